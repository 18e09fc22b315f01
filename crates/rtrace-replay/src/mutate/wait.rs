//! Fence and semaphore waits.
//!
//! A wait's outcome at replay must match the trace, so when the capture
//! recorded the statuses or counter values it observed, the wait is replaced
//! by a replay wait that carries them.

use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, CommandId, WaitState};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::SemaphoreWaitInfo;
use tracing::{debug, warn};

use super::Mutator;
use crate::error::Result;

/// Recorded status of `fence`, or `NOT_READY` if the capture has none.
fn fence_status(fences: &[Handle], statuses: &[i32], fence: Handle) -> i32 {
    fences
        .iter()
        .position(|f| *f == fence)
        .and_then(|i| statuses.get(i).copied())
        .unwrap_or(vk::Result::NOT_READY.as_raw())
}

pub(super) fn wait_for_fences(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::WaitForFences { device, fence_count, p_fences, wait_all, timeout } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    let Some(WaitState::Fences { fences, statuses }) = &cmd.extras.wait_state else {
        return m.default_mutate(id, cmd);
    };
    if !m.has_builder() {
        return m.default_mutate(id, cmd);
    }

    m.apply_reads(cmd)?;
    let waited = m.state.read_handles(p_fences, fence_count);
    let recorded: Vec<i32> = waited.iter().map(|f| fence_status(fences, statuses, *f)).collect();
    let alloc = m.state.alloc_pod_slice(&recorded)?;
    debug!("{}: replaying fence wait with recorded statuses {:?}", id, recorded);

    let mut replacement = cmd.derive(CommandArgs::ReplayWaitForFences {
        device,
        fence_count,
        p_fences,
        wait_all,
        timeout,
        p_statuses: alloc.address(),
    });
    replacement.add_read(alloc.read_observation());
    let result = m.default_mutate(id, &replacement);
    m.state.free(alloc)?;
    result
}

pub(super) fn wait_semaphores(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::WaitSemaphores { device, p_wait_info, timeout, khr } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    let Some(WaitState::Semaphores { semaphores, values }) = &cmd.extras.wait_state else {
        return m.default_mutate(id, cmd);
    };

    m.apply_reads(cmd)?;
    let info: SemaphoreWaitInfo = m.state.memory.read_pod(p_wait_info);
    let waited = m.state.read_handles(info.p_semaphores, info.semaphore_count);
    let recorded: Vec<u64> = waited
        .iter()
        .map(|s| {
            semaphores
                .iter()
                .position(|r| r == s)
                .and_then(|i| values.get(i).copied())
                .unwrap_or_else(|| {
                    warn!("{}: no recorded value for semaphore {}", id, s);
                    0
                })
        })
        .collect();

    if m.has_builder() {
        let alloc = m.state.alloc_pod_slice(&recorded)?;
        let mut replacement = cmd.derive(CommandArgs::ReplayWaitSemaphores {
            device,
            p_wait_info,
            timeout,
            p_values: alloc.address(),
            khr,
        });
        replacement.add_read(alloc.read_observation());
        let result = m.default_mutate(id, &replacement);
        m.state.free(alloc)?;
        result?;
    } else {
        m.default_mutate(id, cmd)?;
    }

    for (semaphore, value) in waited.into_iter().zip(recorded) {
        if let Some(timeline) = m.state.semaphores.get_mut(&semaphore).and_then(|s| s.timeline.as_mut()) {
            *timeline = (*timeline).max(value);
        }
    }
    Ok(())
}

pub(super) fn get_fence_status(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::GetFenceStatus { device, fence } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    if !m.has_builder() {
        return m.default_mutate(id, cmd);
    }
    let status = match &cmd.extras.wait_state {
        Some(WaitState::Fences { fences, statuses }) => fence_status(fences, statuses, fence),
        _ => cmd.result.unwrap_or(vk::Result::SUCCESS.as_raw()),
    };
    let replacement = cmd.derive(CommandArgs::ReplayGetFenceStatus { device, fence, status });
    m.default_mutate(id, &replacement)
}
