//! State rebuild when attaching mid-stream.
//!
//! Every `Recreate*` command runs with the shadow state in recreate mode.
//! Where the bare create call does not restore everything the trace had at
//! attach time, extra commands follow it: buffer and image contents, image
//! layouts, and signaled semaphores and fences.

use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::{BufferCopy, BufferCreateInfo, FenceCreateInfo, ImageSubresourceRange};
use tracing::{debug, warn};

use super::{instance, swapchain, Mutator};
use crate::cmd_builder::{self, ImageTransition, OneShot, StagingBuffer};
use crate::error::Result;
use crate::format;
use crate::primer::{self, PrimeRequest};
use crate::state::SubmitBatch;
use crate::transform::Writer;

/// Recreate commands whose default transition restores everything.
pub(super) fn recreate_plain(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    m.recreating(|m| m.default_mutate(id, cmd))
}

pub(super) fn recreate_instance(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::RecreateInstance { p_create_info, p_instance } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    m.recreating(|m| {
        if !m.has_builder() {
            return m.default_mutate(id, cmd);
        }
        instance::replay_create_instance(m, id, cmd, p_create_info, 0, p_instance)
    })
}

pub(super) fn recreate_device(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::RecreateDevice { physical_device, p_create_info, p_device } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    m.recreating(|m| {
        if !m.has_builder() {
            return m.default_mutate(id, cmd);
        }
        instance::replay_create_device(m, id, cmd, physical_device, p_create_info, 0, p_device)
    })
}

/// A semaphore signaled at attach time is signaled again by an empty
/// submission on the queue that signaled it.
pub(super) fn recreate_semaphore(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::RecreateSemaphore { signaled_on_queue, p_semaphore, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    m.recreating(|m| {
        m.default_mutate(id, cmd)?;
        let semaphore = instance::created_handle(m, p_semaphore);
        if signaled_on_queue.is_null() || semaphore.is_null() {
            return Ok(());
        }
        if m.has_builder() {
            let batch = SubmitBatch { signal_semaphores: vec![semaphore], ..Default::default() };
            let s = cmd_builder::submit(m.state, signaled_on_queue, &batch, Handle::NULL)?;
            m.write_synth(s)?;
        } else if let Some(s) = m.state.semaphores.get_mut(&semaphore) {
            s.signaled = true;
        }
        debug!("{}: semaphore {} signaled on queue {}", id, semaphore, signaled_on_queue);
        Ok(())
    })
}

/// A fence signaled at attach time is created signaled.
pub(super) fn recreate_fence(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::RecreateFence { device, p_create_info, signaled, p_fence } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    m.recreating(|m| {
        if !signaled || p_create_info == 0 {
            return m.default_mutate(id, cmd);
        }
        m.apply_reads(cmd)?;
        let info: FenceCreateInfo = m.state.memory.read_pod(p_create_info);
        let flags = vk::FenceCreateFlags::from_raw(info.flags);
        if flags.contains(vk::FenceCreateFlags::SIGNALED) {
            return m.default_mutate(id, cmd);
        }
        let patched = m.state.alloc_pod(&FenceCreateInfo {
            flags: (flags | vk::FenceCreateFlags::SIGNALED).as_raw(),
            ..info
        })?;
        let mut replacement = cmd.derive(CommandArgs::RecreateFence {
            device,
            p_create_info: patched.address(),
            signaled,
            p_fence,
        });
        replacement.add_read(patched.read_observation());
        let result = m.default_mutate(id, &replacement);
        m.state.free(patched)?;
        result
    })
}

/// Buffer contents are uploaded through a staging copy on the buffer's queue.
/// The buffer gains TRANSFER_DST usage for it if it lacks it.
pub(super) fn recreate_buffer(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::RecreateBuffer { device, queue, p_create_info, memory, memory_offset, p_data, p_buffer } =
        cmd.args
    else {
        return m.default_mutate(id, cmd);
    };
    m.recreating(|m| {
        if !m.has_builder() || p_data == 0 || memory.is_null() || queue.is_null() || p_create_info == 0 {
            return m.default_mutate(id, cmd);
        }
        m.apply_reads(cmd)?;
        let info: BufferCreateInfo = m.state.memory.read_pod(p_create_info);
        let usage = vk::BufferUsageFlags::from_raw(info.usage);
        if usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
            m.default_mutate(id, cmd)?;
        } else {
            let patched = m.state.alloc_pod(&BufferCreateInfo {
                usage: (usage | vk::BufferUsageFlags::TRANSFER_DST).as_raw(),
                ..info
            })?;
            let mut replacement = cmd.derive(CommandArgs::RecreateBuffer {
                device,
                queue,
                p_create_info: patched.address(),
                memory,
                memory_offset,
                p_data,
                p_buffer,
            });
            replacement.add_read(patched.read_observation());
            let result = m.default_mutate(id, &replacement);
            m.state.free(patched)?;
            result?;
        }

        let buffer = instance::created_handle(m, p_buffer);
        if buffer.is_null() {
            return Ok(());
        }
        let size = m.state.buffer(buffer)?.size;
        let data = m.state.memory.read_vec(p_data, size);
        let staging = StagingBuffer::upload(m, device, &data)?;
        let one = OneShot::begin(m, device, queue)?;
        let region = BufferCopy { src_offset: 0, dst_offset: 0, size };
        let s = cmd_builder::copy_buffer(m.state, one.command_buffer, staging.buffer, buffer, &[region])?;
        m.write_synth(s)?;
        let s = cmd_builder::buffer_barrier(
            m.state,
            one.command_buffer,
            buffer,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::MEMORY_READ,
        )?;
        m.write_synth(s)?;
        one.finish(m)?;
        staging.destroy(m)?;
        debug!("{}: restored {} bytes of buffer {}", id, size, buffer);
        Ok(())
    })
}

/// Image contents are primed by copy when the image accepts transfer
/// writes, by the compute primer otherwise. Images without contents are
/// still transitioned to their attach-time layout.
pub(super) fn recreate_image(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::RecreateImage { device, queue, memory, layout, p_data, data_size, p_image, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    m.recreating(|m| {
        m.default_mutate(id, cmd)?;
        let layout = vk::ImageLayout::from_raw(layout);
        let image = instance::created_handle(m, p_image);
        if !m.has_builder() || queue.is_null() || image.is_null() {
            return Ok(());
        }
        if layout == vk::ImageLayout::UNDEFINED || layout == vk::ImageLayout::PREINITIALIZED {
            return Ok(());
        }
        if memory.is_null() {
            warn!("{}: image {} has no memory bound, contents not restored", id, image);
            return Ok(());
        }
        let info = m.state.image(image)?.info;
        if p_data == 0 || data_size == 0 {
            return transition(m, device, queue, image, layout);
        }

        if let Some(expected) = format::image_size(info.format, info.extent, info.mip_levels, info.array_layers) {
            if expected != data_size {
                warn!("{}: image {} expects {} bytes, trace holds {}", id, image, expected, data_size);
            }
        }
        let data = m.state.memory.read_vec(p_data, data_size);
        let req = PrimeRequest { device, queue, image, layout, data: &data };
        if info.usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            return primer::prime_by_copy(m, &req);
        }

        let mut image_primer = m.take_primer();
        let primed = match image_primer.as_deref_mut() {
            Some(p) => p.prime_by_shader(m, &req),
            None => {
                warn!("{}: no image primer, contents of image {} not restored", id, image);
                transition(m, device, queue, image, layout)
            }
        };
        m.restore_primer(image_primer);
        primed
    })
}

/// Recreated swapchains carry the virtual swapchain sentinel like created ones.
pub(super) fn recreate_swapchain(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::RecreateSwapchain { p_create_info, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    m.recreating(|m| {
        if !swapchain::virtual_swapchain_enabled(m) {
            return m.default_mutate(id, cmd);
        }
        swapchain::mutate_injected(m, id, cmd, p_create_info, 0)
    })
}

/// Move every subresource of `image` from UNDEFINED to `layout`.
fn transition(out: &mut dyn Writer, device: Handle, queue: Handle, image: Handle, layout: vk::ImageLayout) -> Result<()> {
    let info = out.state().image(image)?.info;
    let aspects = format::info(info.format).map_or(vk::ImageAspectFlags::COLOR, |f| f.aspects);
    let range = ImageSubresourceRange {
        aspect_mask: aspects.as_raw(),
        ..cmd_builder::color_range(info.mip_levels, info.array_layers)
    };
    let one = OneShot::begin(out, device, queue)?;
    let s = cmd_builder::image_barrier(
        out.state(),
        one.command_buffer,
        ImageTransition {
            image,
            range,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: layout,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::MEMORY_READ,
        },
    )?;
    out.write_synth(s)?;
    one.finish(out)
}
