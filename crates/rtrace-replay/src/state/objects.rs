//! Shadow records of driver objects, keyed by trace-time handle.

use ash::vk;
use rtrace_protocol::command::{CommandId, SurfacePlatform};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::{
    BufferCopy, BufferImageCopy, BufferMemoryBarrier, DescriptorSetLayoutBinding, FormatProperties,
    ImageBlit, ImageMemoryBarrier, ImageSubresourceRange, PhysicalDeviceFeatures,
    PhysicalDeviceMemoryProperties, QueueFamilyProperties, SamplerCreateInfo,
};

use crate::memory::SparseMemory;

#[derive(Debug, Clone, Default)]
pub struct InstanceObject {
    pub handle: Handle,
    pub enabled_layers: Vec<String>,
    pub enabled_extensions: Vec<String>,
    pub physical_devices: Vec<Handle>,
}

#[derive(Debug, Clone, Default)]
pub struct PhysicalDeviceObject {
    pub handle: Handle,
    pub instance: Handle,
    pub queue_families: Vec<QueueFamilyProperties>,
    pub memory_properties: Option<PhysicalDeviceMemoryProperties>,
    /// Raw `VkFormat` -> properties observed for it
    pub format_properties: Vec<(i32, FormatProperties)>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceObject {
    pub handle: Handle,
    pub physical_device: Handle,
    pub enabled_extensions: Vec<String>,
    pub features: Option<PhysicalDeviceFeatures>,
    pub queues: Vec<Handle>,
}

/// A submit batch waiting on a semaphore nothing has signaled yet.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub command: CommandId,
    pub submit_index: usize,
    pub batch: SubmitBatch,
    /// Signaled once this batch runs; non-null only on a submission's last batch.
    pub fence: Handle,
}

#[derive(Debug, Clone)]
pub struct QueueObject {
    pub handle: Handle,
    pub device: Handle,
    pub family_index: u32,
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub pending: Vec<PendingBatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    pub offset: u64,
    pub size: u64,
    /// Application-pool address the range is mapped at.
    pub location: u64,
}

pub struct DeviceMemoryObject {
    pub handle: Handle,
    pub device: Handle,
    pub size: u64,
    pub memory_type_index: u32,
    pub coherent: bool,
    pub mapped: Option<MappedRange>,
    /// Shadow of the allocation's contents.
    pub contents: SparseMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBinding {
    pub memory: Handle,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct BufferObject {
    pub handle: Handle,
    pub device: Handle,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub binding: Option<MemoryBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Debug, Clone)]
pub struct ImageObject {
    pub handle: Handle,
    pub device: Handle,
    pub info: ImageInfo,
    /// Layout the whole image was last transitioned to.
    pub layout: vk::ImageLayout,
    pub binding: Option<MemoryBinding>,
    /// Set for presentable images owned by a swapchain.
    pub swapchain: Option<Handle>,
}

#[derive(Debug, Clone)]
pub struct ImageViewObject {
    pub handle: Handle,
    pub device: Handle,
    pub image: Handle,
    pub format: vk::Format,
    pub subresource_range: ImageSubresourceRange,
}

#[derive(Debug, Clone)]
pub struct SamplerObject {
    pub handle: Handle,
    pub device: Handle,
    pub info: SamplerCreateInfo,
}

#[derive(Debug, Clone, Default)]
pub struct SemaphoreObject {
    pub handle: Handle,
    pub device: Handle,
    pub signaled: bool,
    /// Counter value of a timeline semaphore.
    pub timeline: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct FenceObject {
    pub handle: Handle,
    pub device: Handle,
    pub signaled: bool,
}

#[derive(Debug, Clone)]
pub struct SurfaceObject {
    pub handle: Handle,
    pub instance: Handle,
    pub platform: SurfacePlatform,
}

#[derive(Debug, Clone)]
pub struct SwapchainObject {
    pub handle: Handle,
    pub device: Handle,
    pub surface: Handle,
    pub format: vk::Format,
    pub extent: [u32; 2],
    pub usage: vk::ImageUsageFlags,
    pub images: Vec<Handle>,
    /// Index handed out by the last acquire.
    pub acquired: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandPoolObject {
    pub handle: Handle,
    pub device: Handle,
    pub queue_family_index: u32,
    pub command_buffers: Vec<Handle>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandBufferObject {
    pub handle: Handle,
    pub device: Handle,
    pub pool: Handle,
    pub recording: bool,
    pub commands: Vec<RecordedCommand>,
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutObject {
    pub handle: Handle,
    pub device: Handle,
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolObject {
    pub handle: Handle,
    pub device: Handle,
    pub max_sets: u32,
    pub sets: Vec<Handle>,
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorSetObject {
    pub handle: Handle,
    pub device: Handle,
    pub pool: Handle,
    pub layout: Handle,
}

#[derive(Debug, Clone, Default)]
pub struct FramebufferObject {
    pub handle: Handle,
    pub device: Handle,
    pub render_pass: Handle,
    /// Image views, in attachment order.
    pub attachments: Vec<Handle>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassObject {
    pub handle: Handle,
    pub device: Handle,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderModuleObject {
    pub handle: Handle,
    pub device: Handle,
    pub code_size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutObject {
    pub handle: Handle,
    pub device: Handle,
    pub set_layouts: Vec<Handle>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineObject {
    pub handle: Handle,
    pub device: Handle,
    pub layout: Handle,
    pub bind_point: i32,
    /// Raw `VkDynamicState` values the pipeline was created with.
    pub dynamic_states: Vec<i32>,
}

/// Decoded `VkSubmitInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitBatch {
    pub wait_semaphores: Vec<Handle>,
    pub wait_dst_stage_masks: Vec<u32>,
    pub command_buffers: Vec<Handle>,
    pub signal_semaphores: Vec<Handle>,
}

/// A recorded command-buffer command, kept until the buffer is submitted.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    PipelineBarrier {
        buffer_barriers: Vec<BufferMemoryBarrier>,
        image_barriers: Vec<ImageMemoryBarrier>,
    },
    CopyBuffer {
        src: Handle,
        dst: Handle,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        src: Handle,
        dst: Handle,
        layout: vk::ImageLayout,
        regions: Vec<BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: Handle,
        layout: vk::ImageLayout,
        dst: Handle,
        regions: Vec<BufferImageCopy>,
    },
    BlitImage {
        src: Handle,
        dst: Handle,
        regions: Vec<ImageBlit>,
    },
    BeginRenderPass {
        render_pass: Handle,
        framebuffer: Handle,
    },
    EndRenderPass,
    BindPipeline {
        pipeline: Handle,
    },
    BindDescriptorSets {
        layout: Handle,
        sets: Vec<Handle>,
    },
    Draw,
    Dispatch,
    DebugMarkerBegin {
        name: String,
    },
    DebugMarkerEnd,
}

/// Position of a recorded command within a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubcommandIndex {
    pub submit: usize,
    pub command_buffer: usize,
    pub command: usize,
}

/// Where the most recent submission left the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSubmission {
    pub queue: Handle,
    /// Framebuffer of the last render pass begun in the submission.
    pub framebuffer: Handle,
    pub render_pass: Handle,
    pub drew: bool,
}
