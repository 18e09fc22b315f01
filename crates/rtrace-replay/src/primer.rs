//! Initial image contents for rebuilt state.
//!
//! Images that accept transfer writes are primed by a staging copy. Color
//! images that do not are written by a compute shader that reads the texels
//! from a storage buffer and stores them into a storage image view of each
//! level and layer.

use std::collections::HashMap;

use ash::vk;
use rtrace_protocol::handle::{Handle, HandleKind};
use rtrace_protocol::layout::{DescriptorPoolSize, DescriptorSetLayoutBinding, ImageSubresourceRange};
use tracing::{debug, warn};

use crate::alloc::align_up;
use crate::cmd_builder::{self, DescriptorWrite, ImageTransition, OneShot, StagingBuffer};
use crate::error::{ReplayError, Result};
use crate::format::{self, StorageInfo};
use crate::pool::{FlushPolicy, HomogeneousDescriptorSetPool};
use crate::state::ImageInfo;
use crate::transform::Writer;

/// Offset alignment of each subresource in the source buffer.
const SUBRESOURCE_ALIGNMENT: u64 = 256;

/// Local workgroup size of the priming shader in x and y.
const WORKGROUP: u32 = 8;

/// Compiles GLSL compute shaders to SPIR-V.
pub trait ShaderCompiler {
    fn compile_compute(&mut self, source: &str) -> Result<Vec<u32>>;
}

/// An image to fill with tightly packed texels, laid out level by level
/// with the layers of a level contiguous.
#[derive(Debug, Clone, Copy)]
pub struct PrimeRequest<'d> {
    pub device: Handle,
    pub queue: Handle,
    pub image: Handle,
    /// Layout the image is left in.
    pub layout: vk::ImageLayout,
    pub data: &'d [u8],
}

/// Prime through a staging buffer and `vkCmdCopyBufferToImage`.
pub fn prime_by_copy(out: &mut dyn Writer, req: &PrimeRequest<'_>) -> Result<()> {
    let info = out.state().image(req.image)?.info;
    let regions = cmd_builder::packed_image_regions(info.format, info.extent, info.mip_levels, info.array_layers, 0)
        .ok_or_else(|| unsupported(info.format, vk::ImageAspectFlags::COLOR, "no known texel layout"))?;

    let staging = StagingBuffer::upload(out, req.device, req.data)?;
    let one = OneShot::begin(out, req.device, req.queue)?;
    let range = cmd_builder::color_range(info.mip_levels, info.array_layers);
    let s = cmd_builder::image_barrier(
        out.state(),
        one.command_buffer,
        ImageTransition {
            image: req.image,
            range,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        },
    )?;
    out.write_synth(s)?;
    let s = cmd_builder::copy_buffer_to_image(out.state(), one.command_buffer, staging.buffer, req.image, &regions)?;
    out.write_synth(s)?;
    let s = cmd_builder::image_barrier(
        out.state(),
        one.command_buffer,
        ImageTransition {
            image: req.image,
            range,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: req.layout,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::MEMORY_READ,
        },
    )?;
    out.write_synth(s)?;
    one.finish(out)?;
    staging.destroy(out)?;
    debug!("primed image {} by copy ({} bytes)", req.image, req.data.len());
    Ok(())
}

fn unsupported(format: vk::Format, aspect: vk::ImageAspectFlags, message: &str) -> ReplayError {
    ReplayError::UnsupportedFormat { format, aspect, message: message.to_string() }
}

/// How a compute shader writes `info`'s texels, or why it cannot.
pub fn check_supported(info: &ImageInfo) -> Result<StorageInfo> {
    let Some(f) = format::info(info.format) else {
        return Err(unsupported(info.format, vk::ImageAspectFlags::COLOR, "no known texel layout"));
    };
    if f.aspects != vk::ImageAspectFlags::COLOR {
        return Err(unsupported(info.format, f.aspects, "only color aspects can be written by a shader"));
    }
    if f.is_compressed() {
        return Err(unsupported(info.format, f.aspects, "block-compressed formats cannot be storage images"));
    }
    let Some(storage) = f.storage else {
        return Err(unsupported(info.format, f.aspects, "no storage image equivalent"));
    };
    if info.image_type != vk::ImageType::TYPE_2D {
        return Err(unsupported(info.format, f.aspects, "only 2D images are supported"));
    }
    if info.samples > 1 {
        return Err(unsupported(info.format, f.aspects, "multisampled images are not supported"));
    }
    if !info.usage.contains(vk::ImageUsageFlags::STORAGE) {
        return Err(unsupported(info.format, f.aspects, "image lacks STORAGE usage"));
    }
    Ok(storage)
}

/// GLSL of the compute shader priming images of the given storage format.
pub fn shader_source(storage: &StorageInfo) -> String {
    format!(
        r#"#version 450
layout(local_size_x = {wg}, local_size_y = {wg}) in;
layout(set = 0, binding = 0, {qualifier}) uniform writeonly {image_type} dst;
layout(set = 0, binding = 1, std430) readonly buffer Src {{ uint src[]; }};

void main() {{
    uvec2 size = uvec2(imageSize(dst));
    if (any(greaterThanEqual(gl_GlobalInvocationID.xy, size))) {{
        return;
    }}
    uint i = gl_GlobalInvocationID.y * size.x + gl_GlobalInvocationID.x;
    imageStore(dst, ivec2(gl_GlobalInvocationID.xy), {decode});
}}
"#,
        wg = WORKGROUP,
        qualifier = storage.qualifier,
        image_type = storage.image_type,
        decode = storage.decode,
    )
}

/// One level and layer, and where its texels sit in the source buffer.
#[derive(Debug, Clone, Copy)]
struct Subresource {
    level: u32,
    layer: u32,
    width: u32,
    height: u32,
    offset: u64,
    size: u64,
}

/// Objects the primer keeps per device.
struct DeviceKit {
    set_layout: Handle,
    pipeline_layout: Handle,
    pool: HomogeneousDescriptorSetPool,
    /// Shader module and pipeline per format.
    pipelines: HashMap<vk::Format, (Handle, Handle)>,
}

/// Primes images through compute shaders.
pub struct ImagePrimer {
    compiler: Box<dyn ShaderCompiler>,
    kits: HashMap<Handle, DeviceKit>,
}

impl ImagePrimer {
    pub fn new(compiler: Box<dyn ShaderCompiler>) -> Self {
        Self { compiler, kits: HashMap::new() }
    }

    /// Prime by running a compute shader that stores every texel.
    pub fn prime_by_shader(&mut self, out: &mut dyn Writer, req: &PrimeRequest<'_>) -> Result<()> {
        let info = out.state().image(req.image)?.info;
        let storage = check_supported(&info)?;
        let texel = format::info(info.format)
            .ok_or_else(|| unsupported(info.format, vk::ImageAspectFlags::COLOR, "no known texel layout"))?;

        let mut subresources = Vec::new();
        let mut source = 0u64;
        let mut offset = 0u64;
        for level in 0..info.mip_levels {
            let [width, height, _] = format::mip_extent(info.extent, level);
            let size = texel.level_size(width, height, 1);
            for layer in 0..info.array_layers {
                subresources.push((source, Subresource { level, layer, width, height, offset, size }));
                source += size;
                offset = align_up(offset + size, SUBRESOURCE_ALIGNMENT);
            }
        }
        if (req.data.len() as u64) < source {
            warn!("image {} primed from {} of {} bytes", req.image, req.data.len(), source);
        }
        let mut staged = vec![0u8; offset as usize];
        for (src, sub) in &subresources {
            let (src, dst) = (*src as usize, sub.offset as usize);
            let len = (sub.size as usize).min(req.data.len().saturating_sub(src));
            if len == 0 {
                continue;
            }
            staged[dst..dst + len].copy_from_slice(&req.data[src..src + len]);
        }
        let subresources: Vec<Subresource> = subresources.into_iter().map(|(_, s)| s).collect();

        let pipeline = self.pipeline(out, req.device, info.format, &storage)?;
        let Some(kit) = self.kits.get_mut(&req.device) else {
            return Err(ReplayError::missing(HandleKind::Device, req.device));
        };
        let reservation = kit.pool.reserve(out, subresources.len())?;
        let sets = reservation.sets()?.to_vec();
        let pipeline_layout = kit.pipeline_layout;

        let staging = StagingBuffer::create(out, req.device, offset, vk::BufferUsageFlags::STORAGE_BUFFER)?;
        staging.fill(out, &staged)?;

        let mut views = Vec::with_capacity(subresources.len());
        let mut writes = Vec::with_capacity(subresources.len() * 2);
        for (sub, set) in subresources.iter().zip(&sets) {
            let range = ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR.as_raw(),
                base_mip_level: sub.level,
                level_count: 1,
                base_array_layer: sub.layer,
                layer_count: 1,
            };
            let s = cmd_builder::create_image_view(
                out.state(),
                req.device,
                req.image,
                vk::ImageViewType::TYPE_2D,
                info.format,
                range,
            )?;
            let view = out.write_synth(s)?.unwrap_or_default();
            views.push(view);
            writes.push(DescriptorWrite::StorageImage {
                set: *set,
                binding: 0,
                view,
                layout: vk::ImageLayout::GENERAL,
            });
            writes.push(DescriptorWrite::StorageBuffer {
                set: *set,
                binding: 1,
                buffer: staging.buffer,
                offset: sub.offset,
                range: align_up(sub.size, 4),
            });
        }
        let s = cmd_builder::update_descriptor_sets(out.state(), req.device, &writes)?;
        out.write_synth(s)?;

        let one = OneShot::begin(out, req.device, req.queue)?;
        let range = cmd_builder::color_range(info.mip_levels, info.array_layers);
        let s = cmd_builder::image_barrier(
            out.state(),
            one.command_buffer,
            ImageTransition {
                image: req.image,
                range,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::GENERAL,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::SHADER_WRITE,
            },
        )?;
        out.write_synth(s)?;
        out.write_synth(cmd_builder::bind_compute_pipeline(one.command_buffer, pipeline))?;
        for (sub, set) in subresources.iter().zip(&sets) {
            let s = cmd_builder::bind_compute_descriptor_sets(
                out.state(),
                one.command_buffer,
                pipeline_layout,
                std::slice::from_ref(set),
            )?;
            out.write_synth(s)?;
            out.write_synth(cmd_builder::dispatch(
                one.command_buffer,
                sub.width.div_ceil(WORKGROUP),
                sub.height.div_ceil(WORKGROUP),
                1,
            ))?;
        }
        let s = cmd_builder::image_barrier(
            out.state(),
            one.command_buffer,
            ImageTransition {
                image: req.image,
                range,
                old_layout: vk::ImageLayout::GENERAL,
                new_layout: req.layout,
                src_access: vk::AccessFlags::SHADER_WRITE,
                dst_access: vk::AccessFlags::MEMORY_READ,
            },
        )?;
        out.write_synth(s)?;
        one.finish(out)?;

        for view in views {
            out.write_synth(cmd_builder::destroy_image_view(req.device, view))?;
        }
        staging.destroy(out)?;
        debug!("primed image {} by shader ({} subresources)", req.image, subresources.len());
        Ok(())
    }

    /// The priming pipeline for `format` on `device`, built on first use.
    fn pipeline(
        &mut self,
        out: &mut dyn Writer,
        device: Handle,
        format: vk::Format,
        storage: &StorageInfo,
    ) -> Result<Handle> {
        if !self.kits.contains_key(&device) {
            let kit = Self::create_kit(out, device)?;
            self.kits.insert(device, kit);
        }
        let Some(kit) = self.kits.get_mut(&device) else {
            return Err(ReplayError::missing(HandleKind::Device, device));
        };
        if let Some((_, pipeline)) = kit.pipelines.get(&format) {
            return Ok(*pipeline);
        }

        let spirv = self.compiler.compile_compute(&shader_source(storage))?;
        let s = cmd_builder::create_shader_module(out.state(), device, &spirv)?;
        let module = out.write_synth(s)?.unwrap_or_default();
        let s = cmd_builder::create_compute_pipeline(out.state(), device, kit.pipeline_layout, module)?;
        let pipeline = out.write_synth(s)?.unwrap_or_default();
        kit.pipelines.insert(format, (module, pipeline));
        debug!("priming pipeline {} for {:?} on device {}", pipeline, format, device);
        Ok(pipeline)
    }

    fn create_kit(out: &mut dyn Writer, device: Handle) -> Result<DeviceKit> {
        let binding = |binding: u32, descriptor_type: vk::DescriptorType| DescriptorSetLayoutBinding {
            binding,
            descriptor_type: descriptor_type.as_raw(),
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::COMPUTE.as_raw(),
            p_immutable_samplers: 0,
        };
        let bindings = [
            binding(0, vk::DescriptorType::STORAGE_IMAGE),
            binding(1, vk::DescriptorType::STORAGE_BUFFER),
        ];
        let s = cmd_builder::create_descriptor_set_layout(out.state(), device, &bindings)?;
        let set_layout = out.write_synth(s)?.unwrap_or_default();
        let s = cmd_builder::create_pipeline_layout(out.state(), device, &[set_layout])?;
        let pipeline_layout = out.write_synth(s)?.unwrap_or_default();
        let per_set = bindings
            .iter()
            .map(|b| DescriptorPoolSize { descriptor_type: b.descriptor_type, descriptor_count: 1 })
            .collect();
        Ok(DeviceKit {
            set_layout,
            pipeline_layout,
            pool: HomogeneousDescriptorSetPool::new(device, set_layout, per_set, FlushPolicy::FlushOnGrow),
            pipelines: HashMap::new(),
        })
    }

    /// Devices the primer holds objects on.
    pub fn devices(&self) -> Vec<Handle> {
        let mut devices: Vec<Handle> = self.kits.keys().copied().collect();
        devices.sort();
        devices
    }

    /// Destroy every object the primer created on `device`.
    pub fn release(&mut self, out: &mut dyn Writer, device: Handle) -> Result<()> {
        let Some(mut kit) = self.kits.remove(&device) else {
            return Ok(());
        };
        kit.pool.free(out)?;
        for (_, (module, pipeline)) in kit.pipelines.drain() {
            out.write_synth(cmd_builder::destroy_pipeline(device, pipeline))?;
            out.write_synth(cmd_builder::destroy_shader_module(device, module))?;
        }
        out.write_synth(cmd_builder::destroy_pipeline_layout(device, kit.pipeline_layout))?;
        out.write_synth(cmd_builder::destroy_descriptor_set_layout(device, kit.set_layout))?;
        Ok(())
    }
}
