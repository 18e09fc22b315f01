mod common;

use ash::vk;
use bytemuck::Zeroable;
use common::{Trace, DEVICE, QUEUE, SECOND_QUEUE};
use rtrace_protocol::command::{Command, CommandArgs, CommandKind, ExternalMemoryData, WaitState};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::instruction::Instruction;
use rtrace_protocol::layout::SubmitInfo;
use rtrace_replay::error::ReplayError;
use rtrace_replay::mutate::{Mutator, SubmitRewriter};
use rtrace_replay::replay_builder::InstructionStream;
use rtrace_replay::state::{SubmitBatch, SYNTHETIC_HANDLE_BASE};
use rtrace_replay::transform::Writer;

const RENDERED: Handle = Handle(0x8000);
const EXTRA: Handle = Handle(0x8001);
const FENCE: Handle = Handle(0x8100);

/// A single-batch submission with no command buffers.
fn submission(t: &mut Trace, queue: Handle, waits: &[Handle], signals: &[Handle], fence: Handle) -> Command {
    let mut reads = Vec::new();
    let mut array = |t: &mut Trace, handles: &[Handle]| {
        if handles.is_empty() {
            return 0;
        }
        let raw: Vec<u64> = handles.iter().map(|h| h.0).collect();
        let (address, o) = t.slice(&raw);
        reads.push(o);
        address
    };
    let p_wait_semaphores = array(t, waits);
    let p_signal_semaphores = array(t, signals);
    let p_wait_dst_stage_mask = if waits.is_empty() {
        0
    } else {
        let masks = vec![vk::PipelineStageFlags::ALL_COMMANDS.as_raw(); waits.len()];
        let (address, o) = t.slice(&masks);
        reads.push(o);
        address
    };
    let (p_submits, info) = t.pod(&SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO.as_raw(),
        wait_semaphore_count: waits.len() as u32,
        p_wait_semaphores,
        p_wait_dst_stage_mask,
        signal_semaphore_count: signals.len() as u32,
        p_signal_semaphores,
        ..Zeroable::zeroed()
    });
    reads.push(info);
    common::command(CommandArgs::QueueSubmit { queue, submit_count: 1, p_submits, fence }, reads, vec![])
}

fn submit(t: &mut Trace, out: &mut dyn Writer, queue: Handle, waits: &[Handle], signals: &[Handle], fence: Handle) {
    let cmd = submission(t, queue, waits, signals, fence);
    let id = t.id();
    out.write(id, &cmd).unwrap();
}

fn emitted(stream: &InstructionStream, kind: CommandKind) -> Vec<&Command> {
    stream
        .instructions()
        .iter()
        .filter_map(|i| match i {
            Instruction::Call { command, .. } if command.kind() == kind => Some(command),
            _ => None,
        })
        .collect()
}

#[test]
fn test_rewriter_rejects_other_commands() {
    let cmd = common::command(CommandArgs::QueueWaitIdle { queue: QUEUE }, vec![], vec![]);
    assert!(matches!(SubmitRewriter::new(&cmd), Err(ReplayError::Malformed { .. })));
}

#[test]
fn test_rewriter_mutates_once_and_cleans_up() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let mut m = Mutator::new(&mut state).with_builder(&mut stream);
    common::bring_up(&mut t, &mut m).unwrap();
    common::create_semaphore(&mut t, &mut m, RENDERED).unwrap();
    common::create_semaphore(&mut t, &mut m, EXTRA).unwrap();
    let baseline = m.state.allocator().live_count();

    let cmd = submission(&mut t, QUEUE, &[], &[RENDERED], Handle::NULL);
    let id = t.id();
    let mut rewriter = SubmitRewriter::new(&cmd).unwrap();
    let mut batches = rewriter.submit_infos(m.state).unwrap().to_vec();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].signal_semaphores, vec![RENDERED]);
    assert!(!rewriter.is_hijacked());

    batches[0].signal_semaphores.push(EXTRA);
    rewriter.set_submit_infos(batches);
    assert_eq!(rewriter.submit_infos(m.state).unwrap()[0].signal_semaphores.len(), 2);

    rewriter.mutate(&mut m, id).unwrap();
    rewriter.mutate(&mut m, id).unwrap();
    assert!(rewriter.hijacked().is_some());

    let tracked = rewriter.tracked();
    assert!(tracked > 0);
    assert_eq!(rewriter.cleanup(m.state).unwrap(), tracked);
    assert_eq!(rewriter.cleanup(m.state).unwrap(), 0);
    assert_eq!(m.state.allocator().live_count(), baseline);

    assert!(m.state.semaphore(RENDERED).unwrap().signaled);
    assert!(m.state.semaphore(EXTRA).unwrap().signaled);
    drop(m);
    assert_eq!(emitted(&stream, CommandKind::QueueSubmit).len(), 1);
}

#[test]
fn test_rewriter_without_replacement_mutates_original() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    common::create_fence(&mut t, &mut m, FENCE, false).unwrap();

    let cmd = submission(&mut t, QUEUE, &[], &[], FENCE);
    let id = t.id();
    let mut rewriter = SubmitRewriter::new(&cmd).unwrap();
    rewriter.mutate(&mut m, id).unwrap();
    assert!(rewriter.hijacked().is_none());
    assert_eq!(rewriter.cleanup(m.state).unwrap(), 0);
    assert!(m.state.fence(FENCE).unwrap().signaled);
}

#[test]
fn test_submit_waiting_on_unsignaled_semaphore_is_deferred() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    common::create_semaphore(&mut t, &mut m, RENDERED).unwrap();
    common::create_fence(&mut t, &mut m, FENCE, false).unwrap();

    submit(&mut t, &mut m, QUEUE, &[RENDERED], &[], FENCE);
    assert_eq!(m.state.queue(QUEUE).unwrap().pending.len(), 1);
    assert!(!m.state.fence(FENCE).unwrap().signaled);

    // Later work on the same queue waits behind the deferred batch.
    submit(&mut t, &mut m, QUEUE, &[], &[EXTRA], Handle::NULL);
    assert_eq!(m.state.queue(QUEUE).unwrap().pending.len(), 2);

    submit(&mut t, &mut m, SECOND_QUEUE, &[], &[RENDERED], Handle::NULL);
    assert!(m.state.queue(QUEUE).unwrap().pending.is_empty());
    assert!(m.state.fence(FENCE).unwrap().signaled);
    // Consumed by the wait.
    assert!(!m.state.semaphore(RENDERED).unwrap().signaled);
    assert_eq!(m.state.last_submission.map(|s| s.queue), Some(QUEUE));
}

#[test]
fn test_submit_on_signaled_semaphore_runs_immediately() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    common::create_semaphore(&mut t, &mut m, RENDERED).unwrap();
    common::create_fence(&mut t, &mut m, FENCE, false).unwrap();

    submit(&mut t, &mut m, SECOND_QUEUE, &[], &[RENDERED], Handle::NULL);
    submit(&mut t, &mut m, QUEUE, &[RENDERED], &[], FENCE);
    assert!(m.state.queue(QUEUE).unwrap().pending.is_empty());
    assert!(m.state.fence(FENCE).unwrap().signaled);
}

#[test]
fn test_external_memory_uploaded_before_first_batch() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();

        let payload = [7u8; 64];
        let mut cmd = submission(&mut t, QUEUE, &[], &[], Handle::NULL);
        cmd.extras.external_memory.push(ExternalMemoryData {
            // Past the last batch; lands on it.
            submit_index: 3,
            command_buffer_index: 0,
            buffer: Handle(0x9000),
            offset: 128,
            size: payload.len() as u64,
            data: t.store.store(&payload),
        });
        let id = t.id();
        m.write(id, &cmd).unwrap();
    }

    let submits = emitted(&stream, CommandKind::QueueSubmit);
    assert_eq!(submits.len(), 1);
    let CommandArgs::QueueSubmit { p_submits, submit_count, .. } = submits[0].args else {
        unreachable!()
    };
    assert_eq!(submit_count, 1);
    let info: SubmitInfo = state.memory.read_pod(p_submits);
    assert_eq!(info.command_buffer_count, 1);
    let upload = state.read_handles(info.p_command_buffers, 1)[0];
    assert!(upload.0 >= SYNTHETIC_HANDLE_BASE);

    let kinds: Vec<CommandKind> = stream
        .instructions()
        .iter()
        .filter_map(|i| match i {
            Instruction::Call { command, .. } => Some(command.kind()),
            _ => None,
        })
        .collect();
    let at = |k| kinds.iter().position(|x| *x == k).unwrap();
    assert!(at(CommandKind::CmdCopyBuffer) < at(CommandKind::QueueSubmit));
    assert!(at(CommandKind::QueueSubmit) < at(CommandKind::QueueWaitIdle));
    assert_eq!(kinds.last(), Some(&CommandKind::DestroyCommandPool));
    assert_eq!(state.allocator().live_count(), 0);
}

#[test]
fn test_wait_for_fences_replays_recorded_statuses() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let other = Handle(0x8101);
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        common::create_fence(&mut t, &mut m, FENCE, false).unwrap();
        common::create_fence(&mut t, &mut m, other, false).unwrap();

        let (p_fences, fences) = t.slice(&[FENCE.0, other.0]);
        let mut cmd = common::command(
            CommandArgs::WaitForFences { device: DEVICE, fence_count: 2, p_fences, wait_all: true, timeout: u64::MAX },
            vec![fences],
            vec![],
        );
        cmd.extras.wait_state = Some(WaitState::Fences {
            fences: vec![FENCE],
            statuses: vec![vk::Result::SUCCESS.as_raw()],
        });
        let id = t.id();
        m.write(id, &cmd).unwrap();
    }

    assert!(emitted(&stream, CommandKind::WaitForFences).is_empty());
    let waits = emitted(&stream, CommandKind::ReplayWaitForFences);
    let CommandArgs::ReplayWaitForFences { p_statuses, fence_count, .. } = waits[0].args else {
        unreachable!()
    };
    assert_eq!(fence_count, 2);
    let statuses: Vec<i32> = state.memory.read_slice(p_statuses, 2);
    assert_eq!(statuses, vec![vk::Result::SUCCESS.as_raw(), vk::Result::NOT_READY.as_raw()]);
    assert_eq!(state.allocator().live_count(), 0);
}

#[test]
fn test_wait_for_fences_without_recorded_state_passes_through() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        common::create_fence(&mut t, &mut m, FENCE, true).unwrap();
        let (p_fences, fences) = t.slice(&[FENCE.0]);
        let cmd = common::command(
            CommandArgs::WaitForFences { device: DEVICE, fence_count: 1, p_fences, wait_all: true, timeout: 0 },
            vec![fences],
            vec![],
        );
        let id = t.id();
        m.write(id, &cmd).unwrap();
    }
    assert_eq!(emitted(&stream, CommandKind::WaitForFences).len(), 1);
    assert!(emitted(&stream, CommandKind::ReplayWaitForFences).is_empty());
}

#[test]
fn test_get_fence_status_carries_recorded_status() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        common::create_fence(&mut t, &mut m, FENCE, false).unwrap();
        let cmd = common::command(CommandArgs::GetFenceStatus { device: DEVICE, fence: FENCE }, vec![], vec![])
            .with_result(vk::Result::NOT_READY.as_raw());
        let id = t.id();
        m.write(id, &cmd).unwrap();
    }
    let status = emitted(&stream, CommandKind::ReplayGetFenceStatus);
    assert_eq!(
        status[0].args,
        CommandArgs::ReplayGetFenceStatus { device: DEVICE, fence: FENCE, status: vk::Result::NOT_READY.as_raw() }
    );
}

#[test]
fn test_submit_batch_default_is_empty() {
    let batch = SubmitBatch::default();
    assert!(batch.wait_semaphores.is_empty() && batch.command_buffers.is_empty());
}
