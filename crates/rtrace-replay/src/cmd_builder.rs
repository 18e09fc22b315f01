//! Builders for well-formed synthetic commands.
//!
//! Each builder stages its arguments in fresh allocations, attaches them as
//! read observations, and returns a [`Synth`] owning those allocations. Output
//! handles come from [`State::alloc_handle_output`] and ride along as write
//! observations, so the default mutation registers them like captured ones.

use ash::vk;
use bytemuck::Zeroable;
use rtrace_protocol::command::{Command, CommandArgs};
use rtrace_protocol::handle::{Handle, HandleKind};
use rtrace_protocol::layout::*;
use rtrace_protocol::observation::{Observation, Range};
use tracing::{debug, warn};

use crate::alloc::{align_up, AllocResult};
use crate::error::Result;
use crate::state::{State, SubmitBatch};
use crate::transform::Writer;

/// Thread id recorded on synthesized commands.
pub const SYNTH_THREAD: u64 = 0;

/// Alignment of staging allocations.
const STAGING_ALIGNMENT: u64 = 256;

/// A synthesized command and the allocations backing its arguments.
pub struct Synth {
    pub cmd: Command,
    pub allocs: Vec<AllocResult>,
    /// Handle the command creates, if any.
    pub handle: Option<Handle>,
}

impl Synth {
    pub fn new(args: CommandArgs) -> Self {
        Self {
            cmd: Command::new(SYNTH_THREAD, args),
            allocs: Vec::new(),
            handle: None,
        }
    }

    /// Attach `alloc` as a read and keep it alive with the command.
    pub fn read(&mut self, alloc: AllocResult) -> u64 {
        let address = alloc.address();
        self.cmd.add_read(alloc.read_observation());
        self.allocs.push(alloc);
        address
    }

    /// Attach `alloc` as a write and keep it alive with the command.
    pub fn output(&mut self, alloc: AllocResult) -> u64 {
        let address = alloc.address();
        self.cmd.add_write(alloc.write_observation());
        self.allocs.push(alloc);
        address
    }
}

/// Build a command whose arguments point at staged inputs and one handle output.
fn create_with<T: bytemuck::Pod>(
    state: &mut State,
    info: &T,
    kind: HandleKind,
    args: impl FnOnce(u64, u64) -> CommandArgs,
) -> Result<Synth> {
    let info = state.alloc_pod(info)?;
    let (out, handle) = state.alloc_handle_output(kind)?;
    let (p_info, p_out) = (info.address(), out.address());
    let mut s = Synth::new(args(p_info, p_out));
    s.read(info);
    s.output(out);
    s.handle = Some(handle);
    Ok(s)
}

// ── Command pools / buffers ─────────────────────────────────

pub fn create_command_pool(state: &mut State, device: Handle, queue_family_index: u32) -> Result<Synth> {
    let info = CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO.as_raw(),
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER.as_raw(),
        queue_family_index,
        ..Zeroable::zeroed()
    };
    create_with(state, &info, HandleKind::CommandPool, |p_create_info, p_command_pool| {
        CommandArgs::CreateCommandPool { device, p_create_info, p_allocator: 0, p_command_pool }
    })
}

pub fn allocate_command_buffer(state: &mut State, device: Handle, command_pool: Handle) -> Result<Synth> {
    let info = CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO.as_raw(),
        command_pool: command_pool.0,
        level: vk::CommandBufferLevel::PRIMARY.as_raw(),
        command_buffer_count: 1,
        ..Zeroable::zeroed()
    };
    create_with(state, &info, HandleKind::CommandBuffer, |p_allocate_info, p_command_buffers| {
        CommandArgs::AllocateCommandBuffers { device, p_allocate_info, p_command_buffers }
    })
}

pub fn begin_command_buffer(state: &mut State, command_buffer: Handle) -> Result<Synth> {
    let info = CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO.as_raw(),
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT.as_raw(),
        ..Zeroable::zeroed()
    };
    let alloc = state.alloc_pod(&info)?;
    let mut s = Synth::new(CommandArgs::BeginCommandBuffer { command_buffer, p_begin_info: alloc.address() });
    s.read(alloc);
    Ok(s)
}

pub fn end_command_buffer(command_buffer: Handle) -> Synth {
    Synth::new(CommandArgs::EndCommandBuffer { command_buffer })
}

pub fn destroy_command_pool(device: Handle, command_pool: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyCommandPool { device, command_pool, p_allocator: 0 })
}

// ── Buffers / memory ────────────────────────────────────────

pub fn create_buffer(state: &mut State, device: Handle, size: u64, usage: vk::BufferUsageFlags) -> Result<Synth> {
    let info = BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO.as_raw(),
        size,
        usage: usage.as_raw(),
        sharing_mode: vk::SharingMode::EXCLUSIVE.as_raw(),
        ..Zeroable::zeroed()
    };
    create_with(state, &info, HandleKind::Buffer, |p_create_info, p_buffer| CommandArgs::CreateBuffer {
        device,
        p_create_info,
        p_allocator: 0,
        p_buffer,
    })
}

pub fn destroy_buffer(device: Handle, buffer: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyBuffer { device, buffer, p_allocator: 0 })
}

pub fn allocate_memory(state: &mut State, device: Handle, size: u64, memory_type_index: u32) -> Result<Synth> {
    let info = MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO.as_raw(),
        allocation_size: size,
        memory_type_index,
        ..Zeroable::zeroed()
    };
    create_with(state, &info, HandleKind::DeviceMemory, |p_allocate_info, p_memory| {
        CommandArgs::AllocateMemory { device, p_allocate_info, p_allocator: 0, p_memory }
    })
}

pub fn free_memory(device: Handle, memory: Handle) -> Synth {
    Synth::new(CommandArgs::FreeMemory { device, memory, p_allocator: 0 })
}

pub fn bind_buffer_memory(device: Handle, buffer: Handle, memory: Handle, memory_offset: u64) -> Synth {
    Synth::new(CommandArgs::BindBufferMemory { device, buffer, memory, memory_offset })
}

/// Map `size` bytes of `memory`. The mapped location is a fresh region of the
/// application pool, kept alive with the command until the caller unmaps.
pub fn map_memory(state: &mut State, device: Handle, memory: Handle, offset: u64, size: u64) -> Result<Synth> {
    let region = state.alloc_bytes(&vec![0u8; size as usize])?;
    let location = region.address();
    let out = state.alloc_pod(&location)?;
    let mut s = Synth::new(CommandArgs::MapMemory { device, memory, offset, size, flags: 0, pp_data: out.address() });
    s.output(out);
    s.allocs.push(region);
    Ok(s)
}

/// Write `data` at `location`, a mapping of `memory` at `offset`, and flush it.
pub fn flush_mapped_memory(
    state: &mut State,
    device: Handle,
    memory: Handle,
    location: u64,
    offset: u64,
    data: &[u8],
) -> Result<Synth> {
    state.memory.write(location, data);
    let contents = Observation {
        range: Range::new(location, data.len() as u64),
        id: state.store.store(data),
    };
    let range = MappedMemoryRange {
        s_type: vk::StructureType::MAPPED_MEMORY_RANGE.as_raw(),
        memory: memory.0,
        offset,
        size: data.len() as u64,
        ..Zeroable::zeroed()
    };
    let alloc = state.alloc_pod(&range)?;
    let mut s = Synth::new(CommandArgs::FlushMappedMemoryRanges { device, range_count: 1, p_ranges: alloc.address() });
    s.read(alloc);
    s.cmd.add_read(contents);
    Ok(s)
}

pub fn unmap_memory(device: Handle, memory: Handle) -> Synth {
    Synth::new(CommandArgs::UnmapMemory { device, memory })
}

// ── Recorded commands ───────────────────────────────────────

/// One image layout transition.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransition {
    pub image: Handle,
    pub range: ImageSubresourceRange,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Every level and layer of a color image.
pub fn color_range(mip_levels: u32, array_layers: u32) -> ImageSubresourceRange {
    ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR.as_raw(),
        base_mip_level: 0,
        level_count: mip_levels,
        base_array_layer: 0,
        layer_count: array_layers,
    }
}

fn pipeline_barrier(
    state: &mut State,
    command_buffer: Handle,
    buffer_barriers: &[BufferMemoryBarrier],
    image_barriers: &[ImageMemoryBarrier],
) -> Result<Synth> {
    let mut allocs = Vec::new();
    let p_buffer_memory_barriers = if buffer_barriers.is_empty() {
        0
    } else {
        let a = state.alloc_pod_slice(buffer_barriers)?;
        let address = a.address();
        allocs.push(a);
        address
    };
    let p_image_memory_barriers = if image_barriers.is_empty() {
        0
    } else {
        let a = state.alloc_pod_slice(image_barriers)?;
        let address = a.address();
        allocs.push(a);
        address
    };
    let mut s = Synth::new(CommandArgs::CmdPipelineBarrier {
        command_buffer,
        src_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS.as_raw(),
        dst_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS.as_raw(),
        dependency_flags: 0,
        memory_barrier_count: 0,
        p_memory_barriers: 0,
        buffer_memory_barrier_count: buffer_barriers.len() as u32,
        p_buffer_memory_barriers,
        image_memory_barrier_count: image_barriers.len() as u32,
        p_image_memory_barriers,
    });
    for a in allocs {
        s.read(a);
    }
    Ok(s)
}

pub fn image_barrier(state: &mut State, command_buffer: Handle, t: ImageTransition) -> Result<Synth> {
    let barrier = ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER.as_raw(),
        src_access_mask: t.src_access.as_raw(),
        dst_access_mask: t.dst_access.as_raw(),
        old_layout: t.old_layout.as_raw(),
        new_layout: t.new_layout.as_raw(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: t.image.0,
        subresource_range: t.range,
        ..Zeroable::zeroed()
    };
    pipeline_barrier(state, command_buffer, &[], &[barrier])
}

pub fn buffer_barrier(
    state: &mut State,
    command_buffer: Handle,
    buffer: Handle,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> Result<Synth> {
    let barrier = BufferMemoryBarrier {
        s_type: vk::StructureType::BUFFER_MEMORY_BARRIER.as_raw(),
        src_access_mask: src_access.as_raw(),
        dst_access_mask: dst_access.as_raw(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        buffer: buffer.0,
        offset: 0,
        size: vk::WHOLE_SIZE,
        ..Zeroable::zeroed()
    };
    pipeline_barrier(state, command_buffer, &[barrier], &[])
}

pub fn copy_buffer(
    state: &mut State,
    command_buffer: Handle,
    src_buffer: Handle,
    dst_buffer: Handle,
    regions: &[BufferCopy],
) -> Result<Synth> {
    let alloc = state.alloc_pod_slice(regions)?;
    let mut s = Synth::new(CommandArgs::CmdCopyBuffer {
        command_buffer,
        src_buffer,
        dst_buffer,
        region_count: regions.len() as u32,
        p_regions: alloc.address(),
    });
    s.read(alloc);
    Ok(s)
}

pub fn copy_buffer_to_image(
    state: &mut State,
    command_buffer: Handle,
    src_buffer: Handle,
    dst_image: Handle,
    regions: &[BufferImageCopy],
) -> Result<Synth> {
    let alloc = state.alloc_pod_slice(regions)?;
    let mut s = Synth::new(CommandArgs::CmdCopyBufferToImage {
        command_buffer,
        src_buffer,
        dst_image,
        dst_image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL.as_raw(),
        region_count: regions.len() as u32,
        p_regions: alloc.address(),
    });
    s.read(alloc);
    Ok(s)
}

pub fn copy_image_to_buffer(
    state: &mut State,
    command_buffer: Handle,
    src_image: Handle,
    dst_buffer: Handle,
    regions: &[BufferImageCopy],
) -> Result<Synth> {
    let alloc = state.alloc_pod_slice(regions)?;
    let mut s = Synth::new(CommandArgs::CmdCopyImageToBuffer {
        command_buffer,
        src_image,
        src_image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL.as_raw(),
        dst_buffer,
        region_count: regions.len() as u32,
        p_regions: alloc.address(),
    });
    s.read(alloc);
    Ok(s)
}

pub fn blit_image(
    state: &mut State,
    command_buffer: Handle,
    src_image: Handle,
    dst_image: Handle,
    regions: &[ImageBlit],
    filter: vk::Filter,
) -> Result<Synth> {
    let alloc = state.alloc_pod_slice(regions)?;
    let mut s = Synth::new(CommandArgs::CmdBlitImage {
        command_buffer,
        src_image,
        src_image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL.as_raw(),
        dst_image,
        dst_image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL.as_raw(),
        region_count: regions.len() as u32,
        p_regions: alloc.address(),
        filter: filter.as_raw(),
    });
    s.read(alloc);
    Ok(s)
}

/// Tightly packed copy regions covering every level and layer of a color
/// image, laid out level by level starting at `buffer_offset`.
pub fn packed_image_regions(
    format: vk::Format,
    extent: [u32; 3],
    mip_levels: u32,
    array_layers: u32,
    buffer_offset: u64,
) -> Option<Vec<BufferImageCopy>> {
    let info = crate::format::info(format)?;
    let mut offset = buffer_offset;
    let mut regions = Vec::with_capacity(mip_levels as usize);
    for level in 0..mip_levels {
        let [w, h, d] = crate::format::mip_extent(extent, level);
        regions.push(BufferImageCopy {
            buffer_offset: offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR.as_raw(),
                mip_level: level,
                base_array_layer: 0,
                layer_count: array_layers,
            },
            image_offset: [0; 3],
            image_extent: [w, h, d],
        });
        offset += info.level_size(w, h, d) * u64::from(array_layers);
    }
    Some(regions)
}

// ── Image views ─────────────────────────────────────────────

pub fn create_image_view(
    state: &mut State,
    device: Handle,
    image: Handle,
    view_type: vk::ImageViewType,
    format: vk::Format,
    range: ImageSubresourceRange,
) -> Result<Synth> {
    let info = ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO.as_raw(),
        image: image.0,
        view_type: view_type.as_raw(),
        format: format.as_raw(),
        components: [vk::ComponentSwizzle::IDENTITY.as_raw(); 4],
        subresource_range: range,
        ..Zeroable::zeroed()
    };
    create_with(state, &info, HandleKind::ImageView, |p_create_info, p_view| {
        CommandArgs::CreateImageView { device, p_create_info, p_allocator: 0, p_view }
    })
}

pub fn destroy_image_view(device: Handle, image_view: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyImageView { device, image_view, p_allocator: 0 })
}

// ── Descriptors ─────────────────────────────────────────────

pub fn create_descriptor_set_layout(
    state: &mut State,
    device: Handle,
    bindings: &[DescriptorSetLayoutBinding],
) -> Result<Synth> {
    let binding_count = bindings.len() as u32;
    let bindings = state.alloc_pod_slice(bindings)?;
    let info = DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO.as_raw(),
        binding_count,
        p_bindings: bindings.address(),
        ..Zeroable::zeroed()
    };
    let mut s = match create_with(state, &info, HandleKind::DescriptorSetLayout, |p_create_info, p_set_layout| {
        CommandArgs::CreateDescriptorSetLayout { device, p_create_info, p_allocator: 0, p_set_layout }
    }) {
        Ok(s) => s,
        Err(e) => {
            state.free(bindings)?;
            return Err(e);
        }
    };
    s.read(bindings);
    Ok(s)
}

pub fn destroy_descriptor_set_layout(device: Handle, descriptor_set_layout: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyDescriptorSetLayout { device, descriptor_set_layout, p_allocator: 0 })
}

/// A pool holding `max_sets` sets, each needing `per_set` descriptors.
pub fn create_descriptor_pool(
    state: &mut State,
    device: Handle,
    max_sets: u32,
    per_set: &[DescriptorPoolSize],
) -> Result<Synth> {
    let sizes: Vec<DescriptorPoolSize> = per_set
        .iter()
        .map(|p| DescriptorPoolSize { descriptor_count: p.descriptor_count * max_sets, ..*p })
        .collect();
    let sizes = state.alloc_pod_slice(&sizes)?;
    let info = DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO.as_raw(),
        max_sets,
        pool_size_count: per_set.len() as u32,
        p_pool_sizes: sizes.address(),
        ..Zeroable::zeroed()
    };
    let mut s = match create_with(state, &info, HandleKind::DescriptorPool, |p_create_info, p_descriptor_pool| {
        CommandArgs::CreateDescriptorPool { device, p_create_info, p_allocator: 0, p_descriptor_pool }
    }) {
        Ok(s) => s,
        Err(e) => {
            state.free(sizes)?;
            return Err(e);
        }
    };
    s.read(sizes);
    Ok(s)
}

pub fn destroy_descriptor_pool(device: Handle, descriptor_pool: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyDescriptorPool { device, descriptor_pool, p_allocator: 0 })
}

/// Allocate one set per entry of `layouts` from `pool`.
pub fn allocate_descriptor_sets(
    state: &mut State,
    device: Handle,
    pool: Handle,
    layouts: &[Handle],
) -> Result<(Synth, Vec<Handle>)> {
    let raw: Vec<u64> = layouts.iter().map(|h| h.0).collect();
    let p_layouts = state.alloc_pod_slice(&raw)?;
    let info = DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO.as_raw(),
        descriptor_pool: pool.0,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: p_layouts.address(),
        ..Zeroable::zeroed()
    };
    let mut allocs = vec![p_layouts];
    let staged = state
        .alloc_pod(&info)
        .and_then(|info| {
            allocs.push(info);
            state.alloc_handle_outputs(HandleKind::DescriptorSet, layouts.len())
        });
    let (out, handles) = match staged {
        Ok(staged) => staged,
        Err(e) => {
            state.free_all(allocs)?;
            return Err(e);
        }
    };
    let mut s = Synth::new(CommandArgs::AllocateDescriptorSets {
        device,
        p_allocate_info: allocs[1].address(),
        p_descriptor_sets: out.address(),
    });
    for a in allocs {
        s.read(a);
    }
    s.output(out);
    Ok((s, handles))
}

/// One descriptor update: a storage image or a storage buffer range.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorWrite {
    StorageImage { set: Handle, binding: u32, view: Handle, layout: vk::ImageLayout },
    StorageBuffer { set: Handle, binding: u32, buffer: Handle, offset: u64, range: u64 },
}

pub fn update_descriptor_sets(state: &mut State, device: Handle, writes: &[DescriptorWrite]) -> Result<Synth> {
    let mut s = Synth::new(CommandArgs::UpdateDescriptorSets {
        device,
        descriptor_write_count: 0,
        p_descriptor_writes: 0,
        descriptor_copy_count: 0,
        p_descriptor_copies: 0,
    });
    let mut raw = Vec::with_capacity(writes.len());
    for w in writes {
        let mut write = WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET.as_raw(),
            descriptor_count: 1,
            ..Zeroable::zeroed()
        };
        let staged = match *w {
            DescriptorWrite::StorageImage { set, binding, view, layout } => {
                write.dst_set = set.0;
                write.dst_binding = binding;
                write.descriptor_type = vk::DescriptorType::STORAGE_IMAGE.as_raw();
                state.alloc_pod(&DescriptorImageInfo {
                    image_view: view.0,
                    image_layout: layout.as_raw(),
                    ..Zeroable::zeroed()
                })
            }
            DescriptorWrite::StorageBuffer { set, binding, buffer, offset, range } => {
                write.dst_set = set.0;
                write.dst_binding = binding;
                write.descriptor_type = vk::DescriptorType::STORAGE_BUFFER.as_raw();
                state.alloc_pod(&DescriptorBufferInfo { buffer: buffer.0, offset, range })
            }
        };
        let info = match staged {
            Ok(info) => info,
            Err(e) => {
                state.free_all(s.allocs)?;
                return Err(e);
            }
        };
        match w {
            DescriptorWrite::StorageImage { .. } => write.p_image_info = s.read(info),
            DescriptorWrite::StorageBuffer { .. } => write.p_buffer_info = s.read(info),
        }
        raw.push(write);
    }
    let alloc = match state.alloc_pod_slice(&raw) {
        Ok(a) => a,
        Err(e) => {
            state.free_all(s.allocs)?;
            return Err(e);
        }
    };
    if let CommandArgs::UpdateDescriptorSets { descriptor_write_count, p_descriptor_writes, .. } = &mut s.cmd.args {
        *descriptor_write_count = raw.len() as u32;
        *p_descriptor_writes = alloc.address();
    }
    s.read(alloc);
    Ok(s)
}

// ── Pipelines ───────────────────────────────────────────────

pub fn create_shader_module(state: &mut State, device: Handle, spirv: &[u32]) -> Result<Synth> {
    let code = state.alloc_pod_slice(spirv)?;
    let info = ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO.as_raw(),
        code_size: code.size(),
        p_code: code.address(),
        ..Zeroable::zeroed()
    };
    let mut s = match create_with(state, &info, HandleKind::ShaderModule, |p_create_info, p_shader_module| {
        CommandArgs::CreateShaderModule { device, p_create_info, p_allocator: 0, p_shader_module }
    }) {
        Ok(s) => s,
        Err(e) => {
            state.free(code)?;
            return Err(e);
        }
    };
    s.read(code);
    Ok(s)
}

pub fn destroy_shader_module(device: Handle, shader_module: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyShaderModule { device, shader_module, p_allocator: 0 })
}

pub fn create_pipeline_layout(state: &mut State, device: Handle, set_layouts: &[Handle]) -> Result<Synth> {
    let raw: Vec<u64> = set_layouts.iter().map(|h| h.0).collect();
    let layouts = state.alloc_pod_slice(&raw)?;
    let info = PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO.as_raw(),
        set_layout_count: set_layouts.len() as u32,
        p_set_layouts: layouts.address(),
        ..Zeroable::zeroed()
    };
    let mut s = match create_with(state, &info, HandleKind::PipelineLayout, |p_create_info, p_pipeline_layout| {
        CommandArgs::CreatePipelineLayout { device, p_create_info, p_allocator: 0, p_pipeline_layout }
    }) {
        Ok(s) => s,
        Err(e) => {
            state.free(layouts)?;
            return Err(e);
        }
    };
    s.read(layouts);
    Ok(s)
}

pub fn destroy_pipeline_layout(device: Handle, pipeline_layout: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyPipelineLayout { device, pipeline_layout, p_allocator: 0 })
}

/// A compute pipeline running `main` of `module`.
pub fn create_compute_pipeline(state: &mut State, device: Handle, layout: Handle, module: Handle) -> Result<Synth> {
    let name = state.alloc_cstring("main")?;
    let info = ComputePipelineCreateInfo {
        s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO.as_raw(),
        stage: PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO.as_raw(),
            stage: vk::ShaderStageFlags::COMPUTE.as_raw(),
            module: module.0,
            p_name: name.address(),
            ..Zeroable::zeroed()
        },
        layout: layout.0,
        base_pipeline_index: -1,
        ..Zeroable::zeroed()
    };
    let mut s = match create_with(state, &info, HandleKind::Pipeline, |p_create_infos, p_pipelines| {
        CommandArgs::CreateComputePipelines {
            device,
            pipeline_cache: Handle::NULL,
            create_info_count: 1,
            p_create_infos,
            p_allocator: 0,
            p_pipelines,
        }
    }) {
        Ok(s) => s,
        Err(e) => {
            state.free(name)?;
            return Err(e);
        }
    };
    s.read(name);
    Ok(s)
}

pub fn destroy_pipeline(device: Handle, pipeline: Handle) -> Synth {
    Synth::new(CommandArgs::DestroyPipeline { device, pipeline, p_allocator: 0 })
}

pub fn bind_compute_pipeline(command_buffer: Handle, pipeline: Handle) -> Synth {
    Synth::new(CommandArgs::CmdBindPipeline {
        command_buffer,
        pipeline_bind_point: vk::PipelineBindPoint::COMPUTE.as_raw(),
        pipeline,
    })
}

pub fn bind_compute_descriptor_sets(
    state: &mut State,
    command_buffer: Handle,
    layout: Handle,
    sets: &[Handle],
) -> Result<Synth> {
    let raw: Vec<u64> = sets.iter().map(|h| h.0).collect();
    let alloc = state.alloc_pod_slice(&raw)?;
    let mut s = Synth::new(CommandArgs::CmdBindDescriptorSets {
        command_buffer,
        pipeline_bind_point: vk::PipelineBindPoint::COMPUTE.as_raw(),
        layout,
        first_set: 0,
        descriptor_set_count: sets.len() as u32,
        p_descriptor_sets: alloc.address(),
        dynamic_offset_count: 0,
        p_dynamic_offsets: 0,
    });
    s.read(alloc);
    Ok(s)
}

pub fn dispatch(command_buffer: Handle, x: u32, y: u32, z: u32) -> Synth {
    Synth::new(CommandArgs::CmdDispatch { command_buffer, group_count_x: x, group_count_y: y, group_count_z: z })
}

// ── Queues ──────────────────────────────────────────────────

/// Stage `batches` as a `VkSubmitInfo` array plus its member arrays.
/// The first allocation is the `VkSubmitInfo` array itself.
pub fn encode_submit_batches(state: &mut State, batches: &[SubmitBatch]) -> Result<Vec<AllocResult>> {
    let mut members = Vec::new();
    let mut infos = Vec::with_capacity(batches.len());
    for batch in batches {
        let mut stage = |values: &[u64]| -> Result<u64> {
            if values.is_empty() {
                return Ok(0);
            }
            let a = state.alloc_pod_slice(values)?;
            let address = a.address();
            members.push(a);
            Ok(address)
        };
        let raw = |handles: &[Handle]| handles.iter().map(|h| h.0).collect::<Vec<u64>>();
        let p_wait_semaphores = stage(&raw(&batch.wait_semaphores))?;
        let p_command_buffers = stage(&raw(&batch.command_buffers))?;
        let p_signal_semaphores = stage(&raw(&batch.signal_semaphores))?;
        let p_wait_dst_stage_mask = if batch.wait_semaphores.is_empty() {
            0
        } else {
            let mut masks = batch.wait_dst_stage_masks.clone();
            masks.resize(batch.wait_semaphores.len(), vk::PipelineStageFlags::ALL_COMMANDS.as_raw());
            let a = state.alloc_pod_slice(&masks)?;
            let address = a.address();
            members.push(a);
            address
        };
        infos.push(SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO.as_raw(),
            wait_semaphore_count: batch.wait_semaphores.len() as u32,
            p_wait_semaphores,
            p_wait_dst_stage_mask,
            command_buffer_count: batch.command_buffers.len() as u32,
            p_command_buffers,
            signal_semaphore_count: batch.signal_semaphores.len() as u32,
            p_signal_semaphores,
            ..Zeroable::zeroed()
        });
    }
    let mut allocs = Vec::with_capacity(members.len() + 1);
    allocs.push(state.alloc_pod_slice(&infos)?);
    allocs.extend(members);
    Ok(allocs)
}

pub fn submit(state: &mut State, queue: Handle, batch: &SubmitBatch, fence: Handle) -> Result<Synth> {
    let allocs = encode_submit_batches(state, std::slice::from_ref(batch))?;
    let p_submits = allocs[0].address();
    let mut s = Synth::new(CommandArgs::QueueSubmit { queue, submit_count: 1, p_submits, fence });
    for a in allocs {
        s.read(a);
    }
    Ok(s)
}

pub fn queue_wait_idle(queue: Handle) -> Synth {
    Synth::new(CommandArgs::QueueWaitIdle { queue })
}

// ── Composites ──────────────────────────────────────────────

/// End `command_buffer`, submit it alone on `queue` and wait for the queue.
pub fn submit_and_wait(out: &mut dyn Writer, queue: Handle, command_buffer: Handle) -> Result<()> {
    out.write_synth(end_command_buffer(command_buffer))?;
    let batch = SubmitBatch { command_buffers: vec![command_buffer], ..Default::default() };
    let s = submit(out.state(), queue, &batch, Handle::NULL)?;
    out.write_synth(s)?;
    out.write_synth(queue_wait_idle(queue))?;
    Ok(())
}

/// A one-shot command pool and begun command buffer.
pub struct OneShot {
    pub device: Handle,
    pub queue: Handle,
    pub pool: Handle,
    pub command_buffer: Handle,
}

impl OneShot {
    /// Create a pool on `queue`'s family, allocate a command buffer and begin it.
    pub fn begin(out: &mut dyn Writer, device: Handle, queue: Handle) -> Result<Self> {
        let family = out.state().queue(queue)?.family_index;
        let s = create_command_pool(out.state(), device, family)?;
        let pool = out.write_synth(s)?.unwrap_or_default();
        let s = allocate_command_buffer(out.state(), device, pool)?;
        let command_buffer = out.write_synth(s)?.unwrap_or_default();
        let s = begin_command_buffer(out.state(), command_buffer)?;
        out.write_synth(s)?;
        Ok(Self { device, queue, pool, command_buffer })
    }

    /// Submit, wait idle and destroy the pool.
    pub fn finish(self, out: &mut dyn Writer) -> Result<()> {
        submit_and_wait(out, self.queue, self.command_buffer)?;
        out.write_synth(destroy_command_pool(self.device, self.pool))?;
        Ok(())
    }
}

/// A host-visible buffer bound to its own memory.
#[derive(Debug, Clone, Copy)]
pub struct StagingBuffer {
    pub device: Handle,
    pub buffer: Handle,
    pub memory: Handle,
    pub size: u64,
}

impl StagingBuffer {
    pub fn create(out: &mut dyn Writer, device: Handle, size: u64, usage: vk::BufferUsageFlags) -> Result<Self> {
        let state = out.state();
        let memory_type_index = state
            .find_memory_type(device, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
            .or_else(|| state.find_memory_type(device, vk::MemoryPropertyFlags::HOST_VISIBLE))
            .unwrap_or_else(|| {
                warn!("device {} reports no host-visible memory type, staging in type 0", device);
                0
            });

        let s = create_buffer(out.state(), device, size, usage)?;
        let buffer = out.write_synth(s)?.unwrap_or_default();
        let s = allocate_memory(out.state(), device, align_up(size, STAGING_ALIGNMENT), memory_type_index)?;
        let memory = out.write_synth(s)?.unwrap_or_default();
        out.write_synth(bind_buffer_memory(device, buffer, memory, 0))?;
        debug!("staging buffer {} ({} bytes) in memory {}", buffer, size, memory);
        Ok(Self { device, buffer, memory, size })
    }

    /// Create a staging buffer holding `data`.
    pub fn upload(out: &mut dyn Writer, device: Handle, data: &[u8]) -> Result<Self> {
        let staging = Self::create(out, device, data.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.fill(out, data)?;
        Ok(staging)
    }

    /// Map, write and flush `data` at the start of the buffer, then unmap.
    pub fn fill(&self, out: &mut dyn Writer, data: &[u8]) -> Result<()> {
        let s = map_memory(out.state(), self.device, self.memory, 0, data.len() as u64)?;
        let location = s.allocs.last().map(|a| a.address()).unwrap_or_default();
        let (_, kept) = out.write_synth_keep(s)?;
        let flushed = flush_mapped_memory(out.state(), self.device, self.memory, location, 0, data)
            .and_then(|s| out.write_synth(s));
        let unmapped = out.write_synth(unmap_memory(self.device, self.memory));
        out.state().free_all(kept)?;
        flushed?;
        unmapped?;
        Ok(())
    }

    pub fn destroy(self, out: &mut dyn Writer) -> Result<()> {
        out.write_synth(destroy_buffer(self.device, self.buffer))?;
        out.write_synth(free_memory(self.device, self.memory))?;
        Ok(())
    }
}
