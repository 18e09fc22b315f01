#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::{
    DeviceCreateInfo, FenceCreateInfo, InstanceCreateInfo, MemoryHeap, MemoryType, PhysicalDeviceMemoryProperties,
    QueueFamilyProperties, SemaphoreCreateInfo,
};
use rtrace_protocol::observation::{Observation, Range};
use rtrace_replay::alloc::Allocator;
use rtrace_replay::error::Result;
use rtrace_replay::memory::ResourceStore;
use rtrace_replay::state::{ReplayOptions, State};
use rtrace_replay::transform::Writer;

pub const POOL_BASE: u64 = 0x7e00_0000_0000;
pub const POOL_SIZE: u64 = 0x100_0000;
const TRACE_BASE: u64 = 0x1000_0000;

pub const THREAD: u64 = 1;
pub const INSTANCE: Handle = Handle(0x1000);
pub const PHYSICAL_DEVICE: Handle = Handle(0x2000);
pub const DEVICE: Handle = Handle(0x3000);
pub const QUEUE: Handle = Handle(0x4000);
pub const SECOND_QUEUE: Handle = Handle(0x4001);

/// Captured application memory: every placed value is stored as a resource
/// and addressed by the observation returned for it.
pub struct Trace {
    pub store: Arc<ResourceStore>,
    next_address: u64,
    next_id: u64,
}

impl Trace {
    pub fn new() -> Self {
        Self { store: Arc::new(ResourceStore::new()), next_address: TRACE_BASE, next_id: 0 }
    }

    pub fn state(&self) -> State {
        self.state_with(ReplayOptions::default())
    }

    pub fn state_with(&self, options: ReplayOptions) -> State {
        State::with_options(options, Allocator::new(POOL_BASE, POOL_SIZE), Arc::clone(&self.store))
    }

    pub fn id(&mut self) -> CommandId {
        let id = CommandId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn reserve(&mut self, size: u64) -> u64 {
        let address = self.next_address;
        self.next_address += (size.max(1) + 15) & !15;
        address
    }

    pub fn observe(&self, address: u64, bytes: &[u8]) -> Observation {
        Observation { range: Range::new(address, bytes.len() as u64), id: self.store.store(bytes) }
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> (u64, Observation) {
        let address = self.reserve(bytes.len() as u64);
        (address, self.observe(address, bytes))
    }

    pub fn pod<T: Pod>(&mut self, value: &T) -> (u64, Observation) {
        self.bytes(bytemuck::bytes_of(value))
    }

    pub fn slice<T: Pod>(&mut self, values: &[T]) -> (u64, Observation) {
        self.bytes(bytemuck::cast_slice(values))
    }

    /// NUL-terminated copies of `names` and the pointer array naming them.
    pub fn strings(&mut self, names: &[&str]) -> (u64, Vec<Observation>) {
        let mut observations = Vec::new();
        let mut pointers = Vec::new();
        for name in names {
            let mut bytes = name.as_bytes().to_vec();
            bytes.push(0);
            let (address, o) = self.bytes(&bytes);
            pointers.push(address);
            observations.push(o);
        }
        let (array, o) = self.slice(&pointers);
        observations.push(o);
        (array, observations)
    }

    /// An output slot a create command filled with `handle`.
    pub fn output(&mut self, handle: Handle) -> (u64, Observation) {
        self.pod(&handle.0)
    }
}

pub fn command(args: CommandArgs, reads: Vec<Observation>, writes: Vec<Observation>) -> Command {
    let mut cmd = Command::new(THREAD, args);
    for r in reads {
        cmd.add_read(r);
    }
    for w in writes {
        cmd.add_write(w);
    }
    cmd
}

pub fn instance_command(t: &mut Trace, layers: &[&str]) -> Command {
    let (pp_layers, mut reads) = if layers.is_empty() { (0, Vec::new()) } else { t.strings(layers) };
    let (p_create_info, info) = t.pod(&InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO.as_raw(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: pp_layers,
        ..Zeroable::zeroed()
    });
    reads.push(info);
    let (p_instance, out_handle) = t.output(INSTANCE);
    command(CommandArgs::CreateInstance { p_create_info, p_allocator: 0, p_instance }, reads, vec![out_handle])
}

pub fn create_instance(t: &mut Trace, out: &mut dyn Writer, layers: &[&str]) -> Result<()> {
    let cmd = instance_command(t, layers);
    let id = t.id();
    out.write(id, &cmd)
}

/// One physical device with a single graphics/compute/transfer family of two
/// queues and a single host-visible, coherent memory type.
pub fn enumerate_physical_device(t: &mut Trace, out: &mut dyn Writer) -> Result<()> {
    let (p_count, count) = t.pod(&1u32);
    let (p_devices, devices) = t.output(PHYSICAL_DEVICE);
    let cmd = command(
        CommandArgs::EnumeratePhysicalDevices { instance: INSTANCE, p_count, p_physical_devices: p_devices },
        vec![],
        vec![count, devices],
    );
    let id = t.id();
    out.write(id, &cmd)?;

    let family = QueueFamilyProperties {
        queue_flags: (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER).as_raw(),
        queue_count: 2,
        ..Zeroable::zeroed()
    };
    let (p_count, count) = t.pod(&1u32);
    let (p_properties, properties) = t.pod(&family);
    let cmd = command(
        CommandArgs::GetPhysicalDeviceQueueFamilyProperties {
            physical_device: PHYSICAL_DEVICE,
            p_count,
            p_properties,
        },
        vec![],
        vec![count, properties],
    );
    let id = t.id();
    out.write(id, &cmd)?;

    let mut memory: PhysicalDeviceMemoryProperties = Zeroable::zeroed();
    memory.memory_type_count = 1;
    memory.memory_types[0] = MemoryType {
        property_flags: (vk::MemoryPropertyFlags::DEVICE_LOCAL
            | vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT)
            .as_raw(),
        heap_index: 0,
    };
    memory.memory_heap_count = 1;
    memory.memory_heaps[0] = MemoryHeap { size: 1 << 30, flags: vk::MemoryHeapFlags::DEVICE_LOCAL.as_raw(), _pad0: 0 };
    let (p_properties, properties) = t.pod(&memory);
    let cmd = command(
        CommandArgs::GetPhysicalDeviceMemoryProperties { physical_device: PHYSICAL_DEVICE, p_properties },
        vec![],
        vec![properties],
    );
    let id = t.id();
    out.write(id, &cmd)
}

pub fn create_device(t: &mut Trace, out: &mut dyn Writer, extensions: &[&str]) -> Result<()> {
    let (pp_extensions, mut reads) = if extensions.is_empty() { (0, Vec::new()) } else { t.strings(extensions) };
    let (p_create_info, info) = t.pod(&DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO.as_raw(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: pp_extensions,
        ..Zeroable::zeroed()
    });
    reads.push(info);
    let (p_device, out_handle) = t.output(DEVICE);
    let cmd = command(
        CommandArgs::CreateDevice { physical_device: PHYSICAL_DEVICE, p_create_info, p_allocator: 0, p_device },
        reads,
        vec![out_handle],
    );
    let id = t.id();
    out.write(id, &cmd)
}

pub fn get_queue(t: &mut Trace, out: &mut dyn Writer, queue: Handle, index: u32) -> Result<()> {
    let (p_queue, out_handle) = t.output(queue);
    let cmd = command(
        CommandArgs::GetDeviceQueue { device: DEVICE, queue_family_index: 0, queue_index: index, p_queue },
        vec![],
        vec![out_handle],
    );
    let id = t.id();
    out.write(id, &cmd)
}

/// Instance, physical device, device and both queues.
pub fn bring_up(t: &mut Trace, out: &mut dyn Writer) -> Result<()> {
    create_instance(t, out, &[])?;
    enumerate_physical_device(t, out)?;
    create_device(t, out, &["VK_KHR_swapchain"])?;
    get_queue(t, out, QUEUE, 0)?;
    get_queue(t, out, SECOND_QUEUE, 1)
}

pub fn create_semaphore(t: &mut Trace, out: &mut dyn Writer, semaphore: Handle) -> Result<()> {
    let (p_create_info, info) = t.pod(&SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO.as_raw(),
        ..Zeroable::zeroed()
    });
    let (p_semaphore, out_handle) = t.output(semaphore);
    let cmd = command(
        CommandArgs::CreateSemaphore { device: DEVICE, p_create_info, p_allocator: 0, p_semaphore },
        vec![info],
        vec![out_handle],
    );
    let id = t.id();
    out.write(id, &cmd)
}

pub fn create_fence(t: &mut Trace, out: &mut dyn Writer, fence: Handle, signaled: bool) -> Result<()> {
    let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
    let (p_create_info, info) = t.pod(&FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO.as_raw(),
        flags: flags.as_raw(),
        ..Zeroable::zeroed()
    });
    let (p_fence, out_handle) = t.output(fence);
    let cmd = command(
        CommandArgs::CreateFence { device: DEVICE, p_create_info, p_allocator: 0, p_fence },
        vec![info],
        vec![out_handle],
    );
    let id = t.id();
    out.write(id, &cmd)
}
