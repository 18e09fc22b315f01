use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use rtrace_protocol::command::{Command, CommandId};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::instruction::NotifySource;
use rtrace_protocol::layout::{BufferImageCopy, ImageSubresourceLayers, ImageSubresourceRange};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Transform, Writer};
use crate::cmd_builder::{self, ImageTransition, OneShot, StagingBuffer};
use crate::error::Result;
use crate::format;

/// Why a framebuffer attachment could not be read back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataUnavailable {
    #[error("no queue submission precedes the requested command")]
    NoPreviousSubmission,

    #[error("the last submission drew nothing into a framebuffer")]
    NoPreviousDraw,

    #[error("framebuffer has no attachment {0}")]
    MissingAttachment(u32),

    #[error("the last submission's queue cannot copy images")]
    WrongQueueCapability,

    #[error("no replay builder is attached")]
    NoReplayBuilder,
}

/// Texels of one attachment, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferData {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub bytes: Vec<u8>,
}

/// Called once per request, possibly after the stream has been flushed.
pub type ReadbackCallback = Arc<dyn Fn(std::result::Result<FramebufferData, DataUnavailable>) + Send + Sync>;

/// Reads back framebuffer attachments after chosen commands.
///
/// The attachment is taken from the framebuffer the last submission drew
/// into, copied into a host-visible buffer on the submission's queue, and
/// delivered through a notification.
pub struct FramebufferReadback {
    requests: HashMap<CommandId, Vec<u32>>,
    callback: ReadbackCallback,
}

struct Target {
    device: Handle,
    queue: Handle,
    image: Handle,
    layout: vk::ImageLayout,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    range: ImageSubresourceRange,
    width: u32,
    height: u32,
    size: u64,
}

impl FramebufferReadback {
    pub fn new(callback: ReadbackCallback) -> Self {
        Self { requests: HashMap::new(), callback }
    }

    /// Read `attachment` back once command `after` has been written.
    pub fn request(&mut self, after: CommandId, attachment: u32) {
        self.requests.entry(after).or_default().push(attachment);
    }

    pub fn pending(&self) -> usize {
        self.requests.values().map(Vec::len).sum()
    }

    /// Resolve which image `attachment` names, or why it cannot be read.
    fn target(out: &mut dyn Writer, attachment: u32) -> Result<std::result::Result<Target, DataUnavailable>> {
        if out.builder().is_none() {
            return Ok(Err(DataUnavailable::NoReplayBuilder));
        }
        let state = out.state();
        let Some(last) = state.last_submission else {
            return Ok(Err(DataUnavailable::NoPreviousSubmission));
        };
        if !last.drew || last.framebuffer.is_null() {
            return Ok(Err(DataUnavailable::NoPreviousDraw));
        }
        let framebuffer = state.framebuffer(last.framebuffer)?;
        let Some(&view) = framebuffer.attachments.get(attachment as usize) else {
            return Ok(Err(DataUnavailable::MissingAttachment(attachment)));
        };
        let (fb_width, fb_height) = (framebuffer.width, framebuffer.height);
        let queue_flags = state.queue(last.queue)?.flags;
        if !queue_flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER) {
            return Ok(Err(DataUnavailable::WrongQueueCapability));
        }

        let view = state.image_view(view)?.clone();
        let image = state.image(view.image)?;
        let level = format::mip_extent(image.info.extent, view.subresource_range.base_mip_level);
        let width = fb_width.min(level[0]);
        let height = fb_height.min(level[1]);
        let aspects = format::info(view.format).map_or(vk::ImageAspectFlags::COLOR, |f| f.aspects);
        // Depth wins for combined formats; stencil is read back on its own only.
        let aspect = if aspects.contains(vk::ImageAspectFlags::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else if aspects.contains(vk::ImageAspectFlags::STENCIL) {
            vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let size = format::info(view.format).map_or(u64::from(width) * u64::from(height) * 4, |f| {
            f.level_size(width, height, 1)
        });
        Ok(Ok(Target {
            device: image.device,
            queue: last.queue,
            image: view.image,
            layout: image.layout,
            format: view.format,
            aspect,
            range: ImageSubresourceRange {
                aspect_mask: aspects.as_raw(),
                base_mip_level: view.subresource_range.base_mip_level,
                level_count: 1,
                base_array_layer: view.subresource_range.base_array_layer,
                layer_count: 1,
            },
            width,
            height,
            size,
        }))
    }

    fn read_back(&self, out: &mut dyn Writer, id: CommandId, attachment: u32) -> Result<()> {
        let t = match Self::target(out, attachment)? {
            Ok(t) => t,
            Err(reason) => {
                debug!("{}: attachment {} unavailable: {}", id, attachment, reason);
                (self.callback)(Err(reason));
                return Ok(());
            }
        };
        if t.layout == vk::ImageLayout::UNDEFINED {
            warn!("{}: image {} has no defined layout, readback contents are undefined", id, t.image);
        }

        let staging = StagingBuffer::create(out, t.device, t.size, vk::BufferUsageFlags::TRANSFER_DST)?;
        let one = OneShot::begin(out, t.device, t.queue)?;
        let to_src = ImageTransition {
            image: t.image,
            range: t.range,
            old_layout: t.layout,
            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_access: vk::AccessFlags::MEMORY_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
        };
        let s = cmd_builder::image_barrier(out.state(), one.command_buffer, to_src)?;
        out.write_synth(s)?;
        let region = BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: ImageSubresourceLayers {
                aspect_mask: t.aspect.as_raw(),
                mip_level: t.range.base_mip_level,
                base_array_layer: t.range.base_array_layer,
                layer_count: 1,
            },
            image_offset: [0, 0, 0],
            image_extent: [t.width, t.height, 1],
        };
        let s = cmd_builder::copy_image_to_buffer(out.state(), one.command_buffer, t.image, staging.buffer, &[region])?;
        out.write_synth(s)?;
        let back = ImageTransition {
            old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new_layout: if t.layout == vk::ImageLayout::UNDEFINED { vk::ImageLayout::GENERAL } else { t.layout },
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::MEMORY_READ,
            ..to_src
        };
        let s = cmd_builder::image_barrier(out.state(), one.command_buffer, back)?;
        out.write_synth(s)?;
        one.finish(out)?;

        let s = cmd_builder::map_memory(out.state(), t.device, staging.memory, 0, t.size)?;
        let (_, kept) = out.write_synth_keep(s)?;
        let callback = Arc::clone(&self.callback);
        let (width, height, format, aspect) = (t.width, t.height, t.format, t.aspect);
        if let Some(builder) = out.builder() {
            builder.notify(
                NotifySource::MappedMemory { memory: staging.memory, offset: 0, size: t.size },
                Box::new(move |bytes: &[u8]| {
                    callback(Ok(FramebufferData { width, height, format, aspect, bytes: bytes.to_vec() }));
                }),
            );
        }
        let unmapped = out.write_synth(cmd_builder::unmap_memory(t.device, staging.memory));
        out.state().free_all(kept)?;
        unmapped?;
        staging.destroy(out)?;
        debug!("{}: attachment {} of {}x{} queued for readback", id, attachment, width, height);
        Ok(())
    }
}

impl Transform for FramebufferReadback {
    fn name(&self) -> &'static str {
        "framebuffer_readback"
    }

    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        out.write(id, cmd)?;
        let Some(attachments) = self.requests.remove(&id) else {
            return Ok(());
        };
        for attachment in attachments {
            self.read_back(out, id, attachment)?;
        }
        Ok(())
    }

    fn flush(&mut self, _out: &mut dyn Writer) -> Result<()> {
        for (id, attachments) in self.requests.drain() {
            warn!("{}: command never written, {} readback requests dropped", id, attachments.len());
        }
        Ok(())
    }
}
