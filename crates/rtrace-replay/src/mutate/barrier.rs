use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::layout::{BufferMemoryBarrier, ImageMemoryBarrier};
use tracing::debug;

use super::Mutator;
use crate::error::Result;

/// Ownership side of an external queue-family transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Acquire,
    Release,
}

fn external_transfer(src: u32, dst: u32) -> Option<Transfer> {
    match (src == vk::QUEUE_FAMILY_EXTERNAL, dst == vk::QUEUE_FAMILY_EXTERNAL) {
        (true, false) => Some(Transfer::Acquire),
        (false, true) => Some(Transfer::Release),
        _ => None,
    }
}

/// Rewrite barriers that transfer ownership to or from an external queue
/// family onto the single family the replay device has.
///
/// The external side takes the other side's family index. An acquire is
/// treated as following a transfer write, since the external contents are
/// uploaded by a copy at replay. Returns `None` if no barrier changed.
pub fn rewrite_external_barriers(
    buffers: &[BufferMemoryBarrier],
    images: &[ImageMemoryBarrier],
) -> Option<(Vec<BufferMemoryBarrier>, Vec<ImageMemoryBarrier>)> {
    let mut changed = false;

    let buffers: Vec<BufferMemoryBarrier> = buffers
        .iter()
        .map(|b| {
            let mut b = *b;
            match external_transfer(b.src_queue_family_index, b.dst_queue_family_index) {
                Some(Transfer::Acquire) => {
                    b.src_queue_family_index = b.dst_queue_family_index;
                    b.src_access_mask = vk::AccessFlags::TRANSFER_WRITE.as_raw();
                    changed = true;
                }
                Some(Transfer::Release) => {
                    b.dst_queue_family_index = b.src_queue_family_index;
                    changed = true;
                }
                None => {}
            }
            b
        })
        .collect();

    let images: Vec<ImageMemoryBarrier> = images
        .iter()
        .map(|b| {
            let mut b = *b;
            match external_transfer(b.src_queue_family_index, b.dst_queue_family_index) {
                Some(Transfer::Acquire) => {
                    b.src_queue_family_index = b.dst_queue_family_index;
                    b.src_access_mask = vk::AccessFlags::TRANSFER_WRITE.as_raw();
                    b.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL.as_raw();
                    changed = true;
                }
                Some(Transfer::Release) => {
                    b.dst_queue_family_index = b.src_queue_family_index;
                    changed = true;
                }
                None => {}
            }
            b
        })
        .collect();

    changed.then_some((buffers, images))
}

pub(super) fn pipeline_barrier(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::CmdPipelineBarrier {
        command_buffer,
        src_stage_mask,
        dst_stage_mask,
        dependency_flags,
        memory_barrier_count,
        p_memory_barriers,
        buffer_memory_barrier_count,
        p_buffer_memory_barriers,
        image_memory_barrier_count,
        p_image_memory_barriers,
    } = cmd.args
    else {
        return m.default_mutate(id, cmd);
    };
    if !m.has_builder() {
        return m.default_mutate(id, cmd);
    }

    m.apply_reads(cmd)?;
    let state = &mut *m.state;
    let buffers = read_barriers::<BufferMemoryBarrier>(state, p_buffer_memory_barriers, buffer_memory_barrier_count);
    let images = read_barriers::<ImageMemoryBarrier>(state, p_image_memory_barriers, image_memory_barrier_count);
    let Some((buffers, images)) = rewrite_external_barriers(&buffers, &images) else {
        return m.default_mutate(id, cmd);
    };
    debug!("{}: rewrote external queue family barriers", id);

    let mut allocs = Vec::new();
    let mut p_buffers = 0;
    let mut p_images = 0;
    if !buffers.is_empty() {
        let a = state.alloc_pod_slice(&buffers)?;
        p_buffers = a.address();
        allocs.push(a);
    }
    if !images.is_empty() {
        match state.alloc_pod_slice(&images) {
            Ok(a) => {
                p_images = a.address();
                allocs.push(a);
            }
            Err(e) => {
                state.free_all(allocs)?;
                return Err(e);
            }
        }
    }

    let mut replacement = cmd.derive(CommandArgs::CmdPipelineBarrier {
        command_buffer,
        src_stage_mask,
        dst_stage_mask,
        dependency_flags,
        memory_barrier_count,
        p_memory_barriers,
        buffer_memory_barrier_count,
        p_buffer_memory_barriers: p_buffers,
        image_memory_barrier_count,
        p_image_memory_barriers: p_images,
    });
    for a in &allocs {
        replacement.add_read(a.read_observation());
    }
    let result = m.default_mutate(id, &replacement);
    m.state.free_all(allocs)?;
    result
}

fn read_barriers<T: bytemuck::Pod>(state: &crate::state::State, address: u64, count: u32) -> Vec<T> {
    if address == 0 || count == 0 {
        return Vec::new();
    }
    state.memory.read_slice(address, count as usize)
}
