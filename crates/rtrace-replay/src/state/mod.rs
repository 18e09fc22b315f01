//! The shadow model of driver state, plus the application memory pool and
//! transient allocator that every mutation reads and writes through.

pub mod externs;
pub mod objects;
pub mod transitions;
pub mod watcher;

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use rtrace_core::config::RtraceConfig;
use rtrace_protocol::command::CommandId;
use rtrace_protocol::handle::{Handle, HandleKind};
use rtrace_protocol::layout::{BaseHeader, POINTER_SIZE};
use rtrace_protocol::observation::{Observation, Range};
use tracing::warn;

use crate::alloc::{AllocResult, Allocator};
use crate::error::{ReplayError, Result};
use crate::memory::{ResourceStore, SparseMemory};

pub use externs::{EngineExterns, Externs};
pub use objects::*;
pub use watcher::{LoggingWatcher, StateWatcher};

/// First handle value handed to objects created by synthesized commands.
pub const SYNTHETIC_HANDLE_BASE: u64 = 0xFFFF_FF00_0000_0000;

/// Chains longer than this are treated as cyclic.
const MAX_CHAIN_LEN: usize = 64;

/// Knobs the mutation engine reads while deciding how to rewrite commands.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub strip_device_extensions: Vec<String>,
    pub virtual_swapchain: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        let config = RtraceConfig::default();
        Self {
            strip_device_extensions: config.replay.strip_device_extensions,
            virtual_swapchain: config.replay.virtual_swapchain,
        }
    }
}

/// A structured validation report raised while mutating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub command: CommandId,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    InvalidHandle { kind: HandleKind, handle: Handle },
    ImageLayout { image: Handle, expected: vk::ImageLayout, actual: vk::ImageLayout },
    ImageSubresource { image: Handle, reason: String },
    NullPointer { what: String },
    NonNullPointer { what: String },
    UnrecognizedExtension { name: String },
}

/// One capture or replay session's view of the driver.
pub struct State {
    pub memory: SparseMemory,
    pub store: Arc<ResourceStore>,
    allocator: Allocator,
    pub options: ReplayOptions,

    // ── Objects ─────────────────────────────────────────────
    pub instances: HashMap<Handle, InstanceObject>,
    pub physical_devices: HashMap<Handle, PhysicalDeviceObject>,
    pub devices: HashMap<Handle, DeviceObject>,
    pub queues: HashMap<Handle, QueueObject>,
    pub device_memories: HashMap<Handle, DeviceMemoryObject>,
    pub buffers: HashMap<Handle, BufferObject>,
    pub images: HashMap<Handle, ImageObject>,
    pub image_views: HashMap<Handle, ImageViewObject>,
    pub samplers: HashMap<Handle, SamplerObject>,
    pub semaphores: HashMap<Handle, SemaphoreObject>,
    pub fences: HashMap<Handle, FenceObject>,
    pub surfaces: HashMap<Handle, SurfaceObject>,
    pub swapchains: HashMap<Handle, SwapchainObject>,
    pub command_pools: HashMap<Handle, CommandPoolObject>,
    pub command_buffers: HashMap<Handle, CommandBufferObject>,
    pub descriptor_set_layouts: HashMap<Handle, DescriptorSetLayoutObject>,
    pub descriptor_pools: HashMap<Handle, DescriptorPoolObject>,
    pub descriptor_sets: HashMap<Handle, DescriptorSetObject>,
    pub framebuffers: HashMap<Handle, FramebufferObject>,
    pub render_passes: HashMap<Handle, RenderPassObject>,
    pub shader_modules: HashMap<Handle, ShaderModuleObject>,
    pub pipeline_layouts: HashMap<Handle, PipelineLayoutObject>,
    pub pipelines: HashMap<Handle, PipelineObject>,

    // ── Bookkeeping ─────────────────────────────────────────
    pub issues: Vec<Issue>,
    pub last_submission: Option<LastSubmission>,
    pub debug_markers: Vec<String>,
    pub render_pass_markers: Vec<Handle>,
    /// Device memories mapped from a HOST_COHERENT type.
    pub coherent_memories: Vec<Handle>,
    recreate_depth: u32,
    next_synthetic: u64,
}

macro_rules! lookups {
    ($($get:ident, $get_mut:ident, $field:ident, $ty:ty, $kind:ident;)*) => {
        impl State {
            $(
                pub fn $get(&self, handle: Handle) -> Result<&$ty> {
                    self.$field
                        .get(&handle)
                        .ok_or_else(|| ReplayError::missing(HandleKind::$kind, handle))
                }

                pub fn $get_mut(&mut self, handle: Handle) -> Result<&mut $ty> {
                    self.$field
                        .get_mut(&handle)
                        .ok_or_else(|| ReplayError::missing(HandleKind::$kind, handle))
                }
            )*
        }
    };
}

lookups! {
    instance, instance_mut, instances, InstanceObject, Instance;
    physical_device, physical_device_mut, physical_devices, PhysicalDeviceObject, PhysicalDevice;
    device, device_mut, devices, DeviceObject, Device;
    queue, queue_mut, queues, QueueObject, Queue;
    device_memory, device_memory_mut, device_memories, DeviceMemoryObject, DeviceMemory;
    buffer, buffer_mut, buffers, BufferObject, Buffer;
    image, image_mut, images, ImageObject, Image;
    image_view, image_view_mut, image_views, ImageViewObject, ImageView;
    semaphore, semaphore_mut, semaphores, SemaphoreObject, Semaphore;
    fence, fence_mut, fences, FenceObject, Fence;
    swapchain, swapchain_mut, swapchains, SwapchainObject, Swapchain;
    command_pool, command_pool_mut, command_pools, CommandPoolObject, CommandPool;
    command_buffer, command_buffer_mut, command_buffers, CommandBufferObject, CommandBuffer;
    descriptor_set_layout, descriptor_set_layout_mut, descriptor_set_layouts, DescriptorSetLayoutObject, DescriptorSetLayout;
    descriptor_pool, descriptor_pool_mut, descriptor_pools, DescriptorPoolObject, DescriptorPool;
    framebuffer, framebuffer_mut, framebuffers, FramebufferObject, Framebuffer;
}

impl State {
    pub fn new(config: &RtraceConfig, store: Arc<ResourceStore>) -> Self {
        let options = ReplayOptions {
            strip_device_extensions: config.replay.strip_device_extensions.clone(),
            virtual_swapchain: config.replay.virtual_swapchain,
        };
        Self::with_options(options, Allocator::new(config.allocator.base, config.allocator.capacity), store)
    }

    pub fn with_options(options: ReplayOptions, allocator: Allocator, store: Arc<ResourceStore>) -> Self {
        Self {
            memory: SparseMemory::new(),
            store,
            allocator,
            options,
            instances: HashMap::new(),
            physical_devices: HashMap::new(),
            devices: HashMap::new(),
            queues: HashMap::new(),
            device_memories: HashMap::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            image_views: HashMap::new(),
            samplers: HashMap::new(),
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            surfaces: HashMap::new(),
            swapchains: HashMap::new(),
            command_pools: HashMap::new(),
            command_buffers: HashMap::new(),
            descriptor_set_layouts: HashMap::new(),
            descriptor_pools: HashMap::new(),
            descriptor_sets: HashMap::new(),
            framebuffers: HashMap::new(),
            render_passes: HashMap::new(),
            shader_modules: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            issues: Vec::new(),
            last_submission: None,
            debug_markers: Vec::new(),
            render_pass_markers: Vec::new(),
            coherent_memories: Vec::new(),
            recreate_depth: 0,
            next_synthetic: SYNTHETIC_HANDLE_BASE,
        }
    }

    // ── Transient allocations ───────────────────────────────

    /// Copy `data` into a fresh allocation and store it as a resource.
    pub fn alloc_bytes(&mut self, data: &[u8]) -> Result<AllocResult> {
        let address = self.allocator.alloc(data.len() as u64)?;
        self.memory.write(address, data);
        let id = self.store.store(data);
        Ok(AllocResult::new(address, data.len() as u64, id))
    }

    pub fn alloc_pod<T: Pod>(&mut self, value: &T) -> Result<AllocResult> {
        self.alloc_bytes(bytemuck::bytes_of(value))
    }

    pub fn alloc_pod_slice<T: Pod>(&mut self, values: &[T]) -> Result<AllocResult> {
        self.alloc_bytes(bytemuck::cast_slice(values))
    }

    /// NUL-terminated copy of `s`.
    pub fn alloc_cstring(&mut self, s: &str) -> Result<AllocResult> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.alloc_bytes(&bytes)
    }

    /// A fresh handle of `kind`, written into an 8-byte output allocation.
    /// Attach the result's write observation to the creating command.
    pub fn alloc_handle_output(&mut self, kind: HandleKind) -> Result<(AllocResult, Handle)> {
        let handle = self.next_synthetic_handle(kind);
        let alloc = self.alloc_pod(&handle.0)?;
        Ok((alloc, handle))
    }

    /// `count` fresh handles of `kind` in one output array.
    pub fn alloc_handle_outputs(&mut self, kind: HandleKind, count: usize) -> Result<(AllocResult, Vec<Handle>)> {
        let handles: Vec<Handle> = (0..count).map(|_| self.next_synthetic_handle(kind)).collect();
        let raw: Vec<u64> = handles.iter().map(|h| h.0).collect();
        let alloc = self.alloc_pod_slice(&raw)?;
        Ok((alloc, handles))
    }

    pub fn free(&mut self, alloc: AllocResult) -> Result<()> {
        self.allocator.free(alloc.address())
    }

    /// Free every allocation, returning how many were freed.
    /// Stops at the first failure.
    pub fn free_all(&mut self, allocs: impl IntoIterator<Item = AllocResult>) -> Result<usize> {
        let mut count = 0;
        for alloc in allocs {
            self.free(alloc)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn next_synthetic_handle(&mut self, _kind: HandleKind) -> Handle {
        let handle = Handle(self.next_synthetic);
        self.next_synthetic += 1;
        handle
    }

    /// Snapshot `[base, base + size)` of the pool as a read observation.
    pub fn observe(&self, base: u64, size: u64) -> Observation {
        let bytes = self.memory.read_vec(base, size);
        Observation {
            range: Range::new(base, size),
            id: self.store.store(&bytes),
        }
    }

    // ── Rebuild tracking ────────────────────────────────────

    pub fn enter_recreate(&mut self) {
        self.recreate_depth += 1;
    }

    pub fn exit_recreate(&mut self) {
        self.recreate_depth = self.recreate_depth.saturating_sub(1);
    }

    pub fn is_recreating(&self) -> bool {
        self.recreate_depth > 0
    }

    // ── pNext chains ────────────────────────────────────────

    /// `(address, sType)` of every struct reachable from `p_next`.
    pub fn pnext_chain(&self, p_next: u64) -> Vec<(u64, i32)> {
        let mut chain = Vec::new();
        let mut next = p_next;
        while next != 0 && chain.len() < MAX_CHAIN_LEN {
            let header: BaseHeader = self.memory.read_pod(next);
            chain.push((next, header.s_type));
            next = header.p_next;
        }
        if next != 0 {
            warn!("pNext chain at {:#x} exceeds {} entries, truncated", p_next, MAX_CHAIN_LEN);
        }
        chain
    }

    /// Address of the first struct of type `s_type` in the chain.
    pub fn find_in_chain(&self, p_next: u64, s_type: i32) -> Option<u64> {
        self.pnext_chain(p_next)
            .into_iter()
            .find(|&(_, t)| t == s_type)
            .map(|(addr, _)| addr)
    }

    /// Array of `count` handles at `address`.
    pub fn read_handles(&self, address: u64, count: u32) -> Vec<Handle> {
        if address == 0 {
            return Vec::new();
        }
        self.memory
            .read_slice::<u64>(address, count as usize)
            .into_iter()
            .map(Handle)
            .collect()
    }

    /// Array of `count` C strings at `address`.
    pub fn read_cstr_array(&self, address: u64, count: u32) -> Vec<String> {
        if address == 0 {
            return Vec::new();
        }
        self.memory
            .read_slice::<u64>(address, count as usize)
            .into_iter()
            .map(|p| self.memory.read_cstr(p))
            .collect()
    }

    // ── Queries ─────────────────────────────────────────────

    /// Index of the first memory type on `device` with every bit of `required`.
    pub fn find_memory_type(&self, device: Handle, required: vk::MemoryPropertyFlags) -> Option<u32> {
        let physical = self.devices.get(&device)?.physical_device;
        let props = self.physical_devices.get(&physical)?.memory_properties?;
        (0..props.memory_type_count.min(32)).find(|&i| {
            vk::MemoryPropertyFlags::from_raw(props.memory_types[i as usize].property_flags).contains(required)
        })
    }

    pub fn memory_type_flags(&self, device: Handle, memory_type_index: u32) -> vk::MemoryPropertyFlags {
        self.devices
            .get(&device)
            .and_then(|d| self.physical_devices.get(&d.physical_device))
            .and_then(|p| p.memory_properties)
            .filter(|props| memory_type_index < props.memory_type_count.min(32))
            .map(|props| vk::MemoryPropertyFlags::from_raw(props.memory_types[memory_type_index as usize].property_flags))
            .unwrap_or_default()
    }

    /// Capabilities of the family `queue` was retrieved from.
    pub fn queue_flags(&self, queue: Handle) -> vk::QueueFlags {
        self.queues.get(&queue).map(|q| q.flags).unwrap_or_default()
    }

    /// First queue of `device` whose family supports every bit of `required`.
    pub fn find_queue(&self, device: Handle, required: vk::QueueFlags) -> Option<Handle> {
        let dev = self.devices.get(&device)?;
        dev.queues
            .iter()
            .copied()
            .find(|q| self.queue_flags(*q).contains(required))
    }

    pub(crate) fn report(&mut self, command: CommandId, kind: IssueKind) {
        self.issues.push(Issue { command, kind });
    }
}

/// Size in bytes of a pointer array with `count` entries.
pub fn pointer_array_size(count: u32) -> u64 {
    u64::from(count) * POINTER_SIZE
}
