mod common;

use ash::vk;
use bytemuck::Zeroable;
use common::{Trace, POOL_BASE};
use rtrace_protocol::command::CommandArgs;
use rtrace_protocol::handle::Handle;
use rtrace_protocol::instruction::Instruction;
use rtrace_protocol::layout::{BufferMemoryBarrier, ImageMemoryBarrier};
use rtrace_replay::mutate::{rewrite_external_barriers, Mutator};
use rtrace_replay::replay_builder::InstructionStream;
use rtrace_replay::transform::Writer;

const FAMILY: u32 = 0;

fn buffer_barrier(src: u32, dst: u32) -> BufferMemoryBarrier {
    BufferMemoryBarrier {
        s_type: vk::StructureType::BUFFER_MEMORY_BARRIER.as_raw(),
        src_access_mask: vk::AccessFlags::empty().as_raw(),
        dst_access_mask: vk::AccessFlags::SHADER_READ.as_raw(),
        src_queue_family_index: src,
        dst_queue_family_index: dst,
        buffer: 0x6000,
        size: vk::WHOLE_SIZE,
        ..Zeroable::zeroed()
    }
}

fn image_barrier(src: u32, dst: u32) -> ImageMemoryBarrier {
    ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER.as_raw(),
        dst_access_mask: vk::AccessFlags::SHADER_READ.as_raw(),
        old_layout: vk::ImageLayout::UNDEFINED.as_raw(),
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL.as_raw(),
        src_queue_family_index: src,
        dst_queue_family_index: dst,
        image: 0x6100,
        ..Zeroable::zeroed()
    }
}

#[test]
fn test_acquire_from_external_family() {
    let (buffers, images) = rewrite_external_barriers(
        &[buffer_barrier(vk::QUEUE_FAMILY_EXTERNAL, FAMILY)],
        &[image_barrier(vk::QUEUE_FAMILY_EXTERNAL, FAMILY)],
    )
    .expect("external acquire is rewritten");

    assert_eq!(buffers[0].src_queue_family_index, FAMILY);
    assert_eq!(buffers[0].dst_queue_family_index, FAMILY);
    assert_eq!(buffers[0].src_access_mask, vk::AccessFlags::TRANSFER_WRITE.as_raw());

    assert_eq!(images[0].src_queue_family_index, FAMILY);
    assert_eq!(images[0].src_access_mask, vk::AccessFlags::TRANSFER_WRITE.as_raw());
    assert_eq!(images[0].old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL.as_raw());
    assert_eq!(images[0].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL.as_raw());
}

#[test]
fn test_release_to_external_family() {
    let (buffers, images) = rewrite_external_barriers(
        &[buffer_barrier(FAMILY, vk::QUEUE_FAMILY_EXTERNAL)],
        &[image_barrier(FAMILY, vk::QUEUE_FAMILY_EXTERNAL)],
    )
    .unwrap();

    assert_eq!(buffers[0].dst_queue_family_index, FAMILY);
    // A release keeps its access masks and layouts.
    assert_eq!(buffers[0].src_access_mask, 0);
    assert_eq!(images[0].dst_queue_family_index, FAMILY);
    assert_eq!(images[0].old_layout, vk::ImageLayout::UNDEFINED.as_raw());
}

#[test]
fn test_internal_barriers_unchanged() {
    let ignored = vk::QUEUE_FAMILY_IGNORED;
    assert!(rewrite_external_barriers(&[buffer_barrier(ignored, ignored)], &[image_barrier(0, 1)]).is_none());
    assert!(rewrite_external_barriers(&[], &[]).is_none());
}

#[test]
fn test_mixed_barriers_keep_order() {
    let (buffers, _) = rewrite_external_barriers(
        &[buffer_barrier(FAMILY, FAMILY), buffer_barrier(vk::QUEUE_FAMILY_EXTERNAL, FAMILY)],
        &[],
    )
    .unwrap();
    assert_eq!(buffers.len(), 2);
    assert_eq!(buffers[0], buffer_barrier(FAMILY, FAMILY));
    assert_eq!(buffers[1].src_queue_family_index, FAMILY);
}

#[test]
fn test_pipeline_barrier_replays_rewritten_copy() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let original = image_barrier(vk::QUEUE_FAMILY_EXTERNAL, FAMILY);
    let (p_images, images) = t.slice(&[original]);
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        let cmd = common::command(
            CommandArgs::CmdPipelineBarrier {
                command_buffer: Handle(0x7000),
                src_stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE.as_raw(),
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw(),
                dependency_flags: 0,
                memory_barrier_count: 0,
                p_memory_barriers: 0,
                buffer_memory_barrier_count: 0,
                p_buffer_memory_barriers: 0,
                image_memory_barrier_count: 1,
                p_image_memory_barriers: p_images,
            },
            vec![images.clone()],
            vec![],
        );
        let id = t.id();
        m.write(id, &cmd).unwrap();
    }

    let Some(Instruction::Call { command, .. }) = stream.instructions().last() else {
        panic!("barrier not emitted");
    };
    let CommandArgs::CmdPipelineBarrier { p_image_memory_barriers, .. } = command.args else {
        panic!("unexpected {:?}", command.kind());
    };
    assert!(p_image_memory_barriers >= POOL_BASE);
    // The trace's own barrier is still observed first; the copy comes after.
    assert_eq!(command.observations().reads[0], images);
    let replayed: ImageMemoryBarrier = state.memory.read_pod(p_image_memory_barriers);
    assert_eq!(replayed.src_queue_family_index, FAMILY);
    let traced: ImageMemoryBarrier = state.memory.read_pod(p_images);
    assert_eq!(traced, original);
    assert_eq!(state.allocator().live_count(), 0);
}
