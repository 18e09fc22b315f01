use std::fmt;

use serde::{Deserialize, Serialize};

use crate::handle::Handle;
use crate::observation::{Observation, Observations, ResourceId};

/// Position of a command in the captured stream.
/// Synthesized commands carry [`CommandId::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct CommandId(pub u64);

impl CommandId {
    pub const NONE: CommandId = CommandId(u64::MAX);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Window-system platform of a `vkCreate*SurfaceKHR` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum SurfacePlatform {
    Xlib,
    Xcb,
    Wayland,
    Win32,
    Android,
    MacOs,
}

impl SurfacePlatform {
    pub fn entry_point(self) -> &'static str {
        match self {
            SurfacePlatform::Xlib => "vkCreateXlibSurfaceKHR",
            SurfacePlatform::Xcb => "vkCreateXcbSurfaceKHR",
            SurfacePlatform::Wayland => "vkCreateWaylandSurfaceKHR",
            SurfacePlatform::Win32 => "vkCreateWin32SurfaceKHR",
            SurfacePlatform::Android => "vkCreateAndroidSurfaceKHR",
            SurfacePlatform::MacOs => "vkCreateMacOSSurfaceMVK",
        }
    }
}

macro_rules! commands {
    ($(
        $(#[$meta:meta])*
        $variant:ident = $name:literal { $($field:ident : $ty:ty),* $(,)? }
    ),* $(,)?) => {
        /// Typed arguments of every intercepted entry point and every
        /// synthetic command the replay engine can produce.
        /// Pointer arguments (`p_*`, `pp_*`) are application-pool addresses.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize,
                 rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
        pub enum CommandArgs {
            $(
                $(#[$meta])*
                $variant { $($field: $ty),* },
            )*
        }

        /// Field-less discriminant of [`CommandArgs`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum CommandKind {
            $($variant,)*
        }

        impl CommandArgs {
            pub fn kind(&self) -> CommandKind {
                match self {
                    $(CommandArgs::$variant { .. } => CommandKind::$variant,)*
                }
            }
        }

        impl CommandKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [CommandKind] = &[$(CommandKind::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(CommandKind::$variant => $name,)*
                }
            }
        }
    };
}

commands! {
    // ── Instance / physical device ──────────────────────────
    CreateInstance = "vkCreateInstance" { p_create_info: u64, p_allocator: u64, p_instance: u64 },
    DestroyInstance = "vkDestroyInstance" { instance: Handle, p_allocator: u64 },
    EnumeratePhysicalDevices = "vkEnumeratePhysicalDevices" {
        instance: Handle, p_count: u64, p_physical_devices: u64,
    },
    GetPhysicalDeviceQueueFamilyProperties = "vkGetPhysicalDeviceQueueFamilyProperties" {
        physical_device: Handle, p_count: u64, p_properties: u64,
    },
    GetPhysicalDeviceMemoryProperties = "vkGetPhysicalDeviceMemoryProperties" {
        physical_device: Handle, p_properties: u64,
    },
    GetPhysicalDeviceFormatProperties = "vkGetPhysicalDeviceFormatProperties" {
        physical_device: Handle, format: i32, p_properties: u64,
    },

    // ── Device / queue ──────────────────────────────────────
    CreateDevice = "vkCreateDevice" {
        physical_device: Handle, p_create_info: u64, p_allocator: u64, p_device: u64,
    },
    DestroyDevice = "vkDestroyDevice" { device: Handle, p_allocator: u64 },
    GetDeviceQueue = "vkGetDeviceQueue" {
        device: Handle, queue_family_index: u32, queue_index: u32, p_queue: u64,
    },
    DeviceWaitIdle = "vkDeviceWaitIdle" { device: Handle },
    QueueWaitIdle = "vkQueueWaitIdle" { queue: Handle },
    QueueSubmit = "vkQueueSubmit" { queue: Handle, submit_count: u32, p_submits: u64, fence: Handle },
    QueueBindSparse = "vkQueueBindSparse" {
        queue: Handle, bind_info_count: u32, p_bind_info: u64, fence: Handle,
    },

    // ── Surfaces / swapchains ───────────────────────────────
    CreateSurfaceKhr = "vkCreateSurfaceKHR" {
        platform: SurfacePlatform, instance: Handle, p_create_info: u64, p_allocator: u64, p_surface: u64,
    },
    DestroySurfaceKhr = "vkDestroySurfaceKHR" { instance: Handle, surface: Handle, p_allocator: u64 },
    CreateSwapchainKhr = "vkCreateSwapchainKHR" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_swapchain: u64,
    },
    DestroySwapchainKhr = "vkDestroySwapchainKHR" { device: Handle, swapchain: Handle, p_allocator: u64 },
    GetSwapchainImagesKhr = "vkGetSwapchainImagesKHR" {
        device: Handle, swapchain: Handle, p_count: u64, p_images: u64,
    },
    AcquireNextImageKhr = "vkAcquireNextImageKHR" {
        device: Handle, swapchain: Handle, timeout: u64, semaphore: Handle, fence: Handle, p_image_index: u64,
    },
    QueuePresentKhr = "vkQueuePresentKHR" { queue: Handle, p_present_info: u64 },

    // ── Memory ──────────────────────────────────────────────
    AllocateMemory = "vkAllocateMemory" {
        device: Handle, p_allocate_info: u64, p_allocator: u64, p_memory: u64,
    },
    FreeMemory = "vkFreeMemory" { device: Handle, memory: Handle, p_allocator: u64 },
    MapMemory = "vkMapMemory" {
        device: Handle, memory: Handle, offset: u64, size: u64, flags: u32, pp_data: u64,
    },
    UnmapMemory = "vkUnmapMemory" { device: Handle, memory: Handle },
    FlushMappedMemoryRanges = "vkFlushMappedMemoryRanges" { device: Handle, range_count: u32, p_ranges: u64 },

    // ── Buffers / images ────────────────────────────────────
    CreateBuffer = "vkCreateBuffer" { device: Handle, p_create_info: u64, p_allocator: u64, p_buffer: u64 },
    DestroyBuffer = "vkDestroyBuffer" { device: Handle, buffer: Handle, p_allocator: u64 },
    BindBufferMemory = "vkBindBufferMemory" {
        device: Handle, buffer: Handle, memory: Handle, memory_offset: u64,
    },
    CreateImage = "vkCreateImage" { device: Handle, p_create_info: u64, p_allocator: u64, p_image: u64 },
    DestroyImage = "vkDestroyImage" { device: Handle, image: Handle, p_allocator: u64 },
    BindImageMemory = "vkBindImageMemory" {
        device: Handle, image: Handle, memory: Handle, memory_offset: u64,
    },
    CreateImageView = "vkCreateImageView" { device: Handle, p_create_info: u64, p_allocator: u64, p_view: u64 },
    DestroyImageView = "vkDestroyImageView" { device: Handle, image_view: Handle, p_allocator: u64 },
    CreateSampler = "vkCreateSampler" { device: Handle, p_create_info: u64, p_allocator: u64, p_sampler: u64 },
    DestroySampler = "vkDestroySampler" { device: Handle, sampler: Handle, p_allocator: u64 },
    CreateRenderPass = "vkCreateRenderPass" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_render_pass: u64,
    },
    DestroyRenderPass = "vkDestroyRenderPass" { device: Handle, render_pass: Handle, p_allocator: u64 },
    CreateFramebuffer = "vkCreateFramebuffer" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_framebuffer: u64,
    },
    DestroyFramebuffer = "vkDestroyFramebuffer" { device: Handle, framebuffer: Handle, p_allocator: u64 },

    // ── Synchronization ─────────────────────────────────────
    CreateSemaphore = "vkCreateSemaphore" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_semaphore: u64,
    },
    DestroySemaphore = "vkDestroySemaphore" { device: Handle, semaphore: Handle, p_allocator: u64 },
    CreateFence = "vkCreateFence" { device: Handle, p_create_info: u64, p_allocator: u64, p_fence: u64 },
    DestroyFence = "vkDestroyFence" { device: Handle, fence: Handle, p_allocator: u64 },
    ResetFences = "vkResetFences" { device: Handle, fence_count: u32, p_fences: u64 },
    GetFenceStatus = "vkGetFenceStatus" { device: Handle, fence: Handle },
    WaitForFences = "vkWaitForFences" {
        device: Handle, fence_count: u32, p_fences: u64, wait_all: bool, timeout: u64,
    },
    /// `vkWaitSemaphores`, or `vkWaitSemaphoresKHR` when `khr` is set.
    WaitSemaphores = "vkWaitSemaphores" { device: Handle, p_wait_info: u64, timeout: u64, khr: bool },

    // ── Command pools / buffers ─────────────────────────────
    CreateCommandPool = "vkCreateCommandPool" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_command_pool: u64,
    },
    DestroyCommandPool = "vkDestroyCommandPool" { device: Handle, command_pool: Handle, p_allocator: u64 },
    AllocateCommandBuffers = "vkAllocateCommandBuffers" {
        device: Handle, p_allocate_info: u64, p_command_buffers: u64,
    },
    FreeCommandBuffers = "vkFreeCommandBuffers" {
        device: Handle, command_pool: Handle, command_buffer_count: u32, p_command_buffers: u64,
    },
    BeginCommandBuffer = "vkBeginCommandBuffer" { command_buffer: Handle, p_begin_info: u64 },
    EndCommandBuffer = "vkEndCommandBuffer" { command_buffer: Handle },

    // ── Recorded commands ───────────────────────────────────
    CmdPipelineBarrier = "vkCmdPipelineBarrier" {
        command_buffer: Handle,
        src_stage_mask: u32,
        dst_stage_mask: u32,
        dependency_flags: u32,
        memory_barrier_count: u32,
        p_memory_barriers: u64,
        buffer_memory_barrier_count: u32,
        p_buffer_memory_barriers: u64,
        image_memory_barrier_count: u32,
        p_image_memory_barriers: u64,
    },
    CmdCopyBuffer = "vkCmdCopyBuffer" {
        command_buffer: Handle, src_buffer: Handle, dst_buffer: Handle, region_count: u32, p_regions: u64,
    },
    CmdCopyBufferToImage = "vkCmdCopyBufferToImage" {
        command_buffer: Handle,
        src_buffer: Handle,
        dst_image: Handle,
        dst_image_layout: i32,
        region_count: u32,
        p_regions: u64,
    },
    CmdCopyImageToBuffer = "vkCmdCopyImageToBuffer" {
        command_buffer: Handle,
        src_image: Handle,
        src_image_layout: i32,
        dst_buffer: Handle,
        region_count: u32,
        p_regions: u64,
    },
    CmdBlitImage = "vkCmdBlitImage" {
        command_buffer: Handle,
        src_image: Handle,
        src_image_layout: i32,
        dst_image: Handle,
        dst_image_layout: i32,
        region_count: u32,
        p_regions: u64,
        filter: i32,
    },
    CmdBeginRenderPass = "vkCmdBeginRenderPass" {
        command_buffer: Handle, p_render_pass_begin: u64, contents: i32,
    },
    CmdEndRenderPass = "vkCmdEndRenderPass" { command_buffer: Handle },
    CmdDraw = "vkCmdDraw" {
        command_buffer: Handle, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32,
    },
    CmdBindPipeline = "vkCmdBindPipeline" { command_buffer: Handle, pipeline_bind_point: i32, pipeline: Handle },
    CmdBindDescriptorSets = "vkCmdBindDescriptorSets" {
        command_buffer: Handle,
        pipeline_bind_point: i32,
        layout: Handle,
        first_set: u32,
        descriptor_set_count: u32,
        p_descriptor_sets: u64,
        dynamic_offset_count: u32,
        p_dynamic_offsets: u64,
    },
    CmdDispatch = "vkCmdDispatch" {
        command_buffer: Handle, group_count_x: u32, group_count_y: u32, group_count_z: u32,
    },
    CmdDebugMarkerBeginExt = "vkCmdDebugMarkerBeginEXT" { command_buffer: Handle, p_marker_info: u64 },
    CmdDebugMarkerEndExt = "vkCmdDebugMarkerEndEXT" { command_buffer: Handle },

    // ── Descriptors ─────────────────────────────────────────
    CreateDescriptorSetLayout = "vkCreateDescriptorSetLayout" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_set_layout: u64,
    },
    DestroyDescriptorSetLayout = "vkDestroyDescriptorSetLayout" {
        device: Handle, descriptor_set_layout: Handle, p_allocator: u64,
    },
    CreateDescriptorPool = "vkCreateDescriptorPool" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_descriptor_pool: u64,
    },
    DestroyDescriptorPool = "vkDestroyDescriptorPool" {
        device: Handle, descriptor_pool: Handle, p_allocator: u64,
    },
    AllocateDescriptorSets = "vkAllocateDescriptorSets" {
        device: Handle, p_allocate_info: u64, p_descriptor_sets: u64,
    },
    FreeDescriptorSets = "vkFreeDescriptorSets" {
        device: Handle, descriptor_pool: Handle, descriptor_set_count: u32, p_descriptor_sets: u64,
    },
    UpdateDescriptorSets = "vkUpdateDescriptorSets" {
        device: Handle,
        descriptor_write_count: u32,
        p_descriptor_writes: u64,
        descriptor_copy_count: u32,
        p_descriptor_copies: u64,
    },

    // ── Pipelines ───────────────────────────────────────────
    CreateShaderModule = "vkCreateShaderModule" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_shader_module: u64,
    },
    DestroyShaderModule = "vkDestroyShaderModule" { device: Handle, shader_module: Handle, p_allocator: u64 },
    CreatePipelineLayout = "vkCreatePipelineLayout" {
        device: Handle, p_create_info: u64, p_allocator: u64, p_pipeline_layout: u64,
    },
    DestroyPipelineLayout = "vkDestroyPipelineLayout" {
        device: Handle, pipeline_layout: Handle, p_allocator: u64,
    },
    CreateComputePipelines = "vkCreateComputePipelines" {
        device: Handle,
        pipeline_cache: Handle,
        create_info_count: u32,
        p_create_infos: u64,
        p_allocator: u64,
        p_pipelines: u64,
    },
    DestroyPipeline = "vkDestroyPipeline" { device: Handle, pipeline: Handle, p_allocator: u64 },

    // ── Synthetic replay commands ───────────────────────────
    ReplayCreateVkInstance = "replayCreateVkInstance" { p_create_info: u64, p_allocator: u64, p_instance: u64 },
    ReplayCreateVkDevice = "replayCreateVkDevice" {
        physical_device: Handle, p_create_info: u64, p_allocator: u64, p_device: u64,
    },
    ReplayRegisterVkInstance = "replayRegisterVkInstance" { instance: Handle },
    ReplayUnregisterVkInstance = "replayUnregisterVkInstance" { instance: Handle },
    ReplayRegisterVkDevice = "replayRegisterVkDevice" {
        physical_device: Handle, device: Handle, p_create_info: u64,
    },
    ReplayUnregisterVkDevice = "replayUnregisterVkDevice" { device: Handle },
    /// Allocates memory sized for one image's tightly packed contents.
    ReplayAllocateImageMemory = "replayAllocateImageMemory" {
        device: Handle, p_memory_properties: u64, image: Handle, p_memory: u64,
    },
    /// `p_statuses` holds the `VkResult` each fence reported at trace time.
    ReplayWaitForFences = "replayWaitForFences" {
        device: Handle, fence_count: u32, p_fences: u64, wait_all: bool, timeout: u64, p_statuses: u64,
    },
    /// `p_values` holds the counter value each semaphore reported at trace time.
    ReplayWaitSemaphores = "replayWaitSemaphores" {
        device: Handle, p_wait_info: u64, timeout: u64, p_values: u64, khr: bool,
    },
    ReplayGetFenceStatus = "replayGetFenceStatus" { device: Handle, fence: Handle, status: i32 },

    // ── State rebuild ───────────────────────────────────────
    RecreateInstance = "recreateInstance" { p_create_info: u64, p_instance: u64 },
    RecreatePhysicalDevices = "recreatePhysicalDevices" {
        instance: Handle, p_count: u64, p_physical_devices: u64,
    },
    RecreateDevice = "recreateDevice" { physical_device: Handle, p_create_info: u64, p_device: u64 },
    RecreateQueue = "recreateQueue" {
        device: Handle, queue_family_index: u32, queue_index: u32, p_queue: u64,
    },
    RecreateDeviceMemory = "recreateDeviceMemory" {
        device: Handle,
        p_allocate_info: u64,
        mapped_offset: u64,
        mapped_size: u64,
        mapped_location: u64,
        p_memory: u64,
    },
    /// `p_data`, when non-zero, points at the buffer's full initial contents.
    RecreateBuffer = "recreateBuffer" {
        device: Handle,
        queue: Handle,
        p_create_info: u64,
        memory: Handle,
        memory_offset: u64,
        p_data: u64,
        p_buffer: u64,
    },
    /// `p_data`, when non-zero, points at `data_size` bytes of tightly packed
    /// texels for every mip level and layer, in that order.
    RecreateImage = "recreateImage" {
        device: Handle,
        queue: Handle,
        p_create_info: u64,
        memory: Handle,
        memory_offset: u64,
        layout: i32,
        p_data: u64,
        data_size: u64,
        p_image: u64,
    },
    RecreateSemaphore = "recreateSemaphore" {
        device: Handle, p_create_info: u64, signaled_on_queue: Handle, p_semaphore: u64,
    },
    RecreateFence = "recreateFence" { device: Handle, p_create_info: u64, signaled: bool, p_fence: u64 },
    RecreateSwapchain = "recreateSwapchain" {
        device: Handle, p_create_info: u64, p_image_count: u64, p_images: u64, p_swapchain: u64,
    },
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Recorded fence or semaphore outcomes for a wait command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum WaitState {
    Fences { fences: Vec<Handle>, statuses: Vec<i32> },
    Semaphores { semaphores: Vec<Handle>, values: Vec<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum SurfaceOverride {
    /// Have the virtual swapchain present onto a real surface at replay.
    DisplayToSurface,
}

/// Bytes an external agent wrote into `buffer` before a submission consumed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct ExternalMemoryData {
    pub submit_index: u32,
    pub command_buffer_index: u32,
    pub buffer: Handle,
    pub offset: u64,
    pub size: u64,
    pub data: ResourceId,
}

/// Out-of-band attachments of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Extras {
    pub observations: Observations,
    pub wait_state: Option<WaitState>,
    pub surface_override: Option<SurfaceOverride>,
    pub external_memory: Vec<ExternalMemoryData>,
}

/// One intercepted (or synthesized) API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Command {
    pub thread: u64,
    pub args: CommandArgs,
    /// The `VkResult` returned at trace time, for entry points that return one.
    pub result: Option<i32>,
    pub extras: Extras,
}

impl Command {
    pub fn new(thread: u64, args: CommandArgs) -> Self {
        Self {
            thread,
            args,
            result: None,
            extras: Extras::default(),
        }
    }

    pub fn with_result(mut self, result: i32) -> Self {
        self.result = Some(result);
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.args.kind()
    }

    pub fn observations(&self) -> &Observations {
        &self.extras.observations
    }

    /// A replacement command carrying this command's thread, result and a
    /// copy of every extra, observations included.
    pub fn derive(&self, args: CommandArgs) -> Command {
        Command {
            thread: self.thread,
            args,
            result: self.result,
            extras: self.extras.clone(),
        }
    }

    pub fn add_read(&mut self, observation: Observation) -> &mut Self {
        self.extras.observations.add_read(observation);
        self
    }

    pub fn add_write(&mut self, observation: Observation) -> &mut Self {
        self.extras.observations.add_write(observation);
        self
    }
}
