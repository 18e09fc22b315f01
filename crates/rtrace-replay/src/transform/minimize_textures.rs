use std::collections::HashMap;

use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::{BufferImageCopy, ImageCreateInfo};
use tracing::debug;

use super::{apply_reads, write_patched, Transform, Writer};
use crate::error::Result;
use crate::format;

/// Usages that need the image at its captured size.
const KEEP_SIZE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::INPUT_ATTACHMENT.as_raw(),
);

#[derive(Debug, Clone, Copy)]
struct Minimized {
    extent: [u32; 3],
    mip_levels: u32,
}

/// Shrinks sampled 2D textures so no side exceeds a maximum extent.
///
/// Uploads into a shrunk image keep their buffer addressing and copy only
/// the part of each region that still fits; regions of dropped mip levels
/// are removed. A copy left with no regions is still written, empty.
#[derive(Debug)]
pub struct MinimizeTextures {
    max_extent: u32,
    images: HashMap<Handle, Minimized>,
}

impl MinimizeTextures {
    pub fn new(max_extent: u32) -> Self {
        Self { max_extent: max_extent.max(1), images: HashMap::new() }
    }

    /// Extent and level count of a shrunk image, if `image` was shrunk.
    pub fn minimized(&self, image: Handle) -> Option<([u32; 3], u32)> {
        self.images.get(&image).map(|m| (m.extent, m.mip_levels))
    }

    fn create_image(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        let CommandArgs::CreateImage { device, p_create_info, p_allocator, p_image } = cmd.args else {
            return out.write(id, cmd);
        };
        if p_create_info == 0 {
            return out.write(id, cmd);
        }
        apply_reads(out, cmd)?;
        let info: ImageCreateInfo = out.state().memory.read_pod(p_create_info);
        let usage = vk::ImageUsageFlags::from_raw(info.usage);
        let [w, h, d] = info.extent;
        let shrinkable = vk::ImageType::from_raw(info.image_type) == vk::ImageType::TYPE_2D
            && usage.contains(vk::ImageUsageFlags::SAMPLED)
            && !usage.intersects(KEEP_SIZE)
            && format::info_raw(info.format).is_some_and(|f| !f.is_compressed())
            && (w > self.max_extent || h > self.max_extent);
        if !shrinkable {
            return out.write(id, cmd);
        }

        let extent = [w.min(self.max_extent), h.min(self.max_extent), d];
        let full_chain = 32 - extent[0].max(extent[1]).leading_zeros();
        let mip_levels = info.mip_levels.min(full_chain).max(1);
        debug!("{}: image {}x{} shrunk to {}x{}, {} levels", id, w, h, extent[0], extent[1], mip_levels);

        let alloc = out.state().alloc_pod(&ImageCreateInfo { extent, mip_levels, ..info })?;
        let replacement = cmd.derive(CommandArgs::CreateImage {
            device,
            p_create_info: alloc.address(),
            p_allocator,
            p_image,
        });
        write_patched(out, id, replacement, vec![alloc])?;

        let image = Handle(out.state().memory.read_u64(p_image));
        if !image.is_null() {
            self.images.insert(image, Minimized { extent, mip_levels });
        }
        Ok(())
    }

    fn copy_to_image(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        let CommandArgs::CmdCopyBufferToImage {
            command_buffer,
            src_buffer,
            dst_image,
            dst_image_layout,
            region_count,
            p_regions,
        } = cmd.args
        else {
            return out.write(id, cmd);
        };
        let Some(shrunk) = self.images.get(&dst_image).copied() else {
            return out.write(id, cmd);
        };
        apply_reads(out, cmd)?;
        let regions: Vec<BufferImageCopy> = out.state().memory.read_slice(p_regions, region_count as usize);
        let clipped: Vec<BufferImageCopy> = regions.iter().filter_map(|r| clip(r, shrunk)).collect();
        if clipped.is_empty() {
            // Kept as an empty copy so its observations still flow downstream.
            debug!("{}: copy into shrunk image {} lies outside it, no regions kept", id, dst_image);
            let replacement = cmd.derive(CommandArgs::CmdCopyBufferToImage {
                command_buffer,
                src_buffer,
                dst_image,
                dst_image_layout,
                region_count: 0,
                p_regions: 0,
            });
            return write_patched(out, id, replacement, Vec::new());
        }

        let alloc = out.state().alloc_pod_slice(&clipped)?;
        let replacement = cmd.derive(CommandArgs::CmdCopyBufferToImage {
            command_buffer,
            src_buffer,
            dst_image,
            dst_image_layout,
            region_count: clipped.len() as u32,
            p_regions: alloc.address(),
        });
        write_patched(out, id, replacement, vec![alloc])
    }
}

/// The part of `region` inside the shrunk image, addressing the same
/// source texels.
fn clip(region: &BufferImageCopy, shrunk: Minimized) -> Option<BufferImageCopy> {
    let level = region.image_subresource.mip_level;
    if level >= shrunk.mip_levels {
        return None;
    }
    let bounds = format::mip_extent(shrunk.extent, level);
    let mut clipped = *region;
    for axis in 0..2 {
        let offset = region.image_offset[axis].max(0) as u32;
        if offset >= bounds[axis] {
            return None;
        }
        clipped.image_extent[axis] = region.image_extent[axis].min(bounds[axis] - offset);
    }
    if clipped.buffer_row_length == 0 {
        clipped.buffer_row_length = region.image_extent[0];
    }
    if clipped.buffer_image_height == 0 {
        clipped.buffer_image_height = region.image_extent[1];
    }
    Some(clipped)
}

impl Transform for MinimizeTextures {
    fn name(&self) -> &'static str {
        "minimize_textures"
    }

    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        match cmd.args {
            CommandArgs::CreateImage { .. } => self.create_image(id, cmd, out),
            CommandArgs::CmdCopyBufferToImage { .. } => self.copy_to_image(id, cmd, out),
            CommandArgs::DestroyImage { image, .. } => {
                self.images.remove(&image);
                out.write(id, cmd)
            }
            _ => out.write(id, cmd),
        }
    }
}
