//! Raw 64-bit little-endian layouts of the Vulkan structures the replay
//! engine decodes from, or synthesizes into, the application memory pool.
//!
//! Every struct mirrors the C ABI exactly: enums are `i32`, flags and counts
//! `u32`, handles and pointers `u64`. Padding the C compiler would insert is
//! spelled out as `_padN` fields so the types can be `Pod`.

use bytemuck::{Pod, Zeroable};

/// Reserved structure type outside the Vulkan registry, tagging the virtual-swapchain
/// pNext entry understood by the replay-side swapchain layer.
pub const VIRTUAL_SWAPCHAIN_PNEXT: i32 = 0xFFFF_FFAA_u32 as i32;

/// Size of a pointer in the captured process.
pub const POINTER_SIZE: u64 = 8;

/// Common prefix of every extensible structure (`VkBaseInStructure`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BaseHeader {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
}

/// Byte offset of `pNext` inside any extensible structure.
pub const P_NEXT_OFFSET: u64 = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VirtualSwapchainPNext {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub surface_create_info: u64,
}

// ── Instance / device ───────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct InstanceCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub p_application_info: u64,
    pub enabled_layer_count: u32,
    pub _pad2: u32,
    pub pp_enabled_layer_names: u64,
    pub enabled_extension_count: u32,
    pub _pad3: u32,
    pub pp_enabled_extension_names: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DeviceQueueCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub queue_family_index: u32,
    pub queue_count: u32,
    pub _pad1: u32,
    pub p_queue_priorities: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DeviceCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub queue_create_info_count: u32,
    pub p_queue_create_infos: u64,
    pub enabled_layer_count: u32,
    pub _pad1: u32,
    pub pp_enabled_layer_names: u64,
    pub enabled_extension_count: u32,
    pub _pad2: u32,
    pub pp_enabled_extension_names: u64,
    pub p_enabled_features: u64,
}

/// `VkPhysicalDeviceFeatures`: 55 consecutive `VkBool32`s.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PhysicalDeviceFeatures {
    pub features: [u32; 55],
}

impl PhysicalDeviceFeatures {
    pub const SAMPLER_ANISOTROPY: usize = 19;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct QueueFamilyProperties {
    pub queue_flags: u32,
    pub queue_count: u32,
    pub timestamp_valid_bits: u32,
    pub min_image_transfer_granularity: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MemoryType {
    pub property_flags: u32,
    pub heap_index: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MemoryHeap {
    pub size: u64,
    pub flags: u32,
    pub _pad0: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PhysicalDeviceMemoryProperties {
    pub memory_type_count: u32,
    pub memory_types: [MemoryType; 32],
    pub memory_heap_count: u32,
    pub memory_heaps: [MemoryHeap; 16],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct FormatProperties {
    pub linear_tiling_features: u32,
    pub optimal_tiling_features: u32,
    pub buffer_features: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    pub memory_type_bits: u32,
    pub _pad0: u32,
}

// ── Surfaces / swapchains ───────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SwapchainCreateInfoKhr {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub surface: u64,
    pub min_image_count: u32,
    pub image_format: i32,
    pub image_color_space: i32,
    pub image_extent: [u32; 2],
    pub image_array_layers: u32,
    pub image_usage: u32,
    pub image_sharing_mode: i32,
    pub queue_family_index_count: u32,
    pub _pad2: u32,
    pub p_queue_family_indices: u64,
    pub pre_transform: u32,
    pub composite_alpha: u32,
    pub present_mode: i32,
    pub clipped: u32,
    pub old_swapchain: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PresentInfoKhr {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub wait_semaphore_count: u32,
    pub _pad1: u32,
    pub p_wait_semaphores: u64,
    pub swapchain_count: u32,
    pub _pad2: u32,
    pub p_swapchains: u64,
    pub p_image_indices: u64,
    pub p_results: u64,
}

// ── Memory ──────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MemoryAllocateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub allocation_size: u64,
    pub memory_type_index: u32,
    pub _pad1: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ImportMemoryFdInfoKhr {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub handle_type: u32,
    pub fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MappedMemoryRange {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub memory: u64,
    pub offset: u64,
    pub size: u64,
}

// ── Buffers / images ────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BufferCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub size: u64,
    pub usage: u32,
    pub sharing_mode: i32,
    pub queue_family_index_count: u32,
    pub _pad2: u32,
    pub p_queue_family_indices: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ImageCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub image_type: i32,
    pub format: i32,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub tiling: i32,
    pub usage: u32,
    pub sharing_mode: i32,
    pub queue_family_index_count: u32,
    pub _pad1: u32,
    pub p_queue_family_indices: u64,
    pub initial_layout: i32,
    pub _pad2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ImageSubresourceRange {
    pub aspect_mask: u32,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ImageSubresourceLayers {
    pub aspect_mask: u32,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ImageViewCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub image: u64,
    pub view_type: i32,
    pub format: i32,
    pub components: [i32; 4],
    pub subresource_range: ImageSubresourceRange,
    pub _pad2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SamplerCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub mag_filter: i32,
    pub min_filter: i32,
    pub mipmap_mode: i32,
    pub address_mode_u: i32,
    pub address_mode_v: i32,
    pub address_mode_w: i32,
    pub mip_lod_bias: f32,
    pub anisotropy_enable: u32,
    pub max_anisotropy: f32,
    pub compare_enable: u32,
    pub compare_op: i32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: i32,
    pub unnormalized_coordinates: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FramebufferCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub render_pass: u64,
    pub attachment_count: u32,
    pub _pad2: u32,
    pub p_attachments: u64,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub _pad3: u32,
}

// ── Synchronization ─────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SemaphoreCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SemaphoreTypeCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub semaphore_type: i32,
    pub _pad1: u32,
    pub initial_value: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FenceCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SemaphoreWaitInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub semaphore_count: u32,
    pub p_semaphores: u64,
    pub p_values: u64,
}

// ── Command pools / buffers / submission ────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CommandPoolCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub queue_family_index: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CommandBufferAllocateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub command_pool: u64,
    pub level: i32,
    pub command_buffer_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CommandBufferBeginInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub p_inheritance_info: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SubmitInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub wait_semaphore_count: u32,
    pub _pad1: u32,
    pub p_wait_semaphores: u64,
    pub p_wait_dst_stage_mask: u64,
    pub command_buffer_count: u32,
    pub _pad2: u32,
    pub p_command_buffers: u64,
    pub signal_semaphore_count: u32,
    pub _pad3: u32,
    pub p_signal_semaphores: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SparseMemoryBind {
    pub resource_offset: u64,
    pub size: u64,
    pub memory: u64,
    pub memory_offset: u64,
    pub flags: u32,
    pub _pad0: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SparseBufferMemoryBindInfo {
    pub buffer: u64,
    pub bind_count: u32,
    pub _pad0: u32,
    pub p_binds: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BindSparseInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub wait_semaphore_count: u32,
    pub _pad1: u32,
    pub p_wait_semaphores: u64,
    pub buffer_bind_count: u32,
    pub _pad2: u32,
    pub p_buffer_binds: u64,
    pub image_opaque_bind_count: u32,
    pub _pad3: u32,
    pub p_image_opaque_binds: u64,
    pub image_bind_count: u32,
    pub _pad4: u32,
    pub p_image_binds: u64,
    pub signal_semaphore_count: u32,
    pub _pad5: u32,
    pub p_signal_semaphores: u64,
}

// ── Recorded commands ───────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MemoryBarrier {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferMemoryBarrier {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub buffer: u64,
    pub offset: u64,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ImageMemoryBarrier {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub old_layout: i32,
    pub new_layout: i32,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub image: u64,
    pub subresource_range: ImageSubresourceRange,
    pub _pad1: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: [i32; 3],
    pub image_extent: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ImageBlit {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offsets: [[i32; 3]; 2],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offsets: [[i32; 3]; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RenderPassBeginInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub render_pass: u64,
    pub framebuffer: u64,
    pub render_area_offset: [i32; 2],
    pub render_area_extent: [u32; 2],
    pub clear_value_count: u32,
    pub _pad1: u32,
    pub p_clear_values: u64,
}

// ── Descriptors / pipelines ─────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: i32,
    pub descriptor_count: u32,
    pub stage_flags: u32,
    pub p_immutable_samplers: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DescriptorSetLayoutCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub binding_count: u32,
    pub p_bindings: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DescriptorPoolSize {
    pub descriptor_type: i32,
    pub descriptor_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DescriptorPoolCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub max_sets: u32,
    pub pool_size_count: u32,
    pub _pad1: u32,
    pub p_pool_sizes: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DescriptorSetAllocateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub descriptor_pool: u64,
    pub descriptor_set_count: u32,
    pub _pad1: u32,
    pub p_set_layouts: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct WriteDescriptorSet {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub dst_set: u64,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_count: u32,
    pub descriptor_type: i32,
    pub p_image_info: u64,
    pub p_buffer_info: u64,
    pub p_texel_buffer_view: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DescriptorImageInfo {
    pub sampler: u64,
    pub image_view: u64,
    pub image_layout: i32,
    pub _pad0: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DescriptorBufferInfo {
    pub buffer: u64,
    pub offset: u64,
    pub range: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShaderModuleCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub code_size: u64,
    pub p_code: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PipelineLayoutCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub set_layout_count: u32,
    pub p_set_layouts: u64,
    pub push_constant_range_count: u32,
    pub _pad1: u32,
    pub p_push_constant_ranges: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PipelineShaderStageCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub stage: u32,
    pub module: u64,
    pub p_name: u64,
    pub p_specialization_info: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ComputePipelineCreateInfo {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub flags: u32,
    pub _pad1: u32,
    pub stage: PipelineShaderStageCreateInfo,
    pub layout: u64,
    pub base_pipeline_handle: u64,
    pub base_pipeline_index: i32,
    pub _pad2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DebugMarkerMarkerInfoExt {
    pub s_type: i32,
    pub _pad0: u32,
    pub p_next: u64,
    pub p_marker_name: u64,
    pub color: [f32; 4],
}
