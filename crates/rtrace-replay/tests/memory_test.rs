mod common;

use ash::vk;
use bytemuck::Zeroable;
use common::{Trace, DEVICE, QUEUE};
use rtrace_protocol::command::{CommandArgs, CommandKind};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::instruction::Instruction;
use rtrace_protocol::layout::{
    BindSparseInfo, ImageCreateInfo, ImportMemoryFdInfoKhr, MappedMemoryRange, MemoryAllocateInfo, MemoryType,
    PhysicalDeviceMemoryProperties, SparseBufferMemoryBindInfo, SparseMemoryBind,
};
use rtrace_protocol::observation::{Observation, Range};
use rtrace_replay::mutate::Mutator;
use rtrace_replay::replay_builder::InstructionStream;
use rtrace_replay::transform::Writer;

const MEMORY: Handle = Handle(0x6000);
const IMAGE: Handle = Handle(0x6100);
const SEMAPHORE: Handle = Handle(0x6200);
const MAPPED_AT: u64 = 0x5000_0000;

/// A 4 KiB allocation whose info optionally chains an fd import.
fn allocate(t: &mut Trace, out: &mut dyn Writer, import: bool) -> u64 {
    let mut reads = Vec::new();
    let mut p_next = 0;
    if import {
        let (p_import, o) = t.pod(&ImportMemoryFdInfoKhr {
            s_type: vk::StructureType::IMPORT_MEMORY_FD_INFO_KHR.as_raw(),
            handle_type: vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD.as_raw(),
            fd: 7,
            ..Zeroable::zeroed()
        });
        reads.push(o);
        p_next = p_import;
    }
    let (p_allocate_info, o) = t.pod(&MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO.as_raw(),
        p_next,
        allocation_size: 4096,
        memory_type_index: 0,
        ..Zeroable::zeroed()
    });
    reads.push(o);
    let (p_memory, written) = t.output(MEMORY);
    let cmd = common::command(
        CommandArgs::AllocateMemory { device: DEVICE, p_allocate_info, p_allocator: 0, p_memory },
        reads,
        vec![written],
    );
    let id = t.id();
    out.write(id, &cmd).unwrap();
    p_allocate_info
}

#[test]
fn test_allocate_memory_unlinks_fd_import() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let p_info;
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        p_info = allocate(&mut t, &mut m, true);
    }

    let info: MemoryAllocateInfo = state.memory.read_pod(p_info);
    assert_eq!(info.p_next, 0);
    let Some(Instruction::Call { command, .. }) = stream.instructions().last() else {
        panic!("allocation not emitted");
    };
    assert_eq!(command.kind(), CommandKind::AllocateMemory);
    // The patched pNext is observed after every captured read.
    let patch = command.observations().reads.last().unwrap();
    assert_eq!(patch.range, Range::new(p_info + 8, 8));
    assert_eq!(state.device_memory(MEMORY).unwrap().size, 4096);
    assert!(state.device_memory(MEMORY).unwrap().coherent);
}

#[test]
fn test_allocate_memory_keeps_import_without_builder() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    let p_info = allocate(&mut t, &mut m, true);

    let info: MemoryAllocateInfo = m.state.memory.read_pod(p_info);
    assert_ne!(info.p_next, 0);
}

#[test]
fn test_coherent_mapping_flushes_on_unmap() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    allocate(&mut t, &mut m, false);

    let (pp_data, location) = t.pod(&MAPPED_AT);
    let cmd = common::command(
        CommandArgs::MapMemory { device: DEVICE, memory: MEMORY, offset: 0, size: vk::WHOLE_SIZE, flags: 0, pp_data },
        vec![],
        vec![location],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();
    assert_eq!(m.state.coherent_memories, vec![MEMORY]);
    let mapped = m.state.device_memory(MEMORY).unwrap().mapped.unwrap();
    assert_eq!((mapped.location, mapped.size), (MAPPED_AT, 4096));

    // The application wrote through the mapping before unmapping.
    let written = t.observe(MAPPED_AT + 16, &[1, 2, 3, 4]);
    let cmd = common::command(CommandArgs::UnmapMemory { device: DEVICE, memory: MEMORY }, vec![written], vec![]);
    let id = t.id();
    m.mutate(id, &cmd).unwrap();

    let memory = m.state.device_memory(MEMORY).unwrap();
    assert_eq!(memory.contents.read_vec(16, 4), vec![1, 2, 3, 4]);
    assert!(memory.mapped.is_none());
    assert!(m.state.coherent_memories.is_empty());
}

/// Map the first `size` bytes of MEMORY at MAPPED_AT.
fn map(t: &mut Trace, m: &mut Mutator<'_>, size: u64) {
    let (pp_data, location) = t.pod(&MAPPED_AT);
    let cmd = common::command(
        CommandArgs::MapMemory { device: DEVICE, memory: MEMORY, offset: 0, size, flags: 0, pp_data },
        vec![],
        vec![location],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();
}

fn flush(t: &mut Trace, m: &mut Mutator<'_>, offset: u64, size: u64, mut reads: Vec<Observation>) {
    let (p_ranges, ranges) = t.pod(&MappedMemoryRange {
        s_type: vk::StructureType::MAPPED_MEMORY_RANGE.as_raw(),
        memory: MEMORY.0,
        offset,
        size,
        ..Zeroable::zeroed()
    });
    reads.push(ranges);
    let cmd = common::command(
        CommandArgs::FlushMappedMemoryRanges { device: DEVICE, range_count: 1, p_ranges },
        reads,
        vec![],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();
}

#[test]
fn test_flush_copies_mapped_bytes() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    allocate(&mut t, &mut m, false);
    map(&mut t, &mut m, 64);

    // The application wrote through the mapping before flushing.
    let written = t.observe(MAPPED_AT + 8, &[9, 8, 7]);
    flush(&mut t, &mut m, 0, vk::WHOLE_SIZE, vec![written]);

    assert_eq!(m.state.device_memory(MEMORY).unwrap().contents.read_vec(8, 3), vec![9, 8, 7]);
}

#[test]
fn test_flush_past_mapping_is_skipped() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    allocate(&mut t, &mut m, false);
    map(&mut t, &mut m, 64);

    flush(&mut t, &mut m, 128, vk::WHOLE_SIZE, vec![]);
    flush(&mut t, &mut m, 64, 16, vec![]);

    let memory = m.state.device_memory(MEMORY).unwrap();
    assert_eq!(memory.contents.read_vec(64, 16), vec![0; 16]);
    assert!(memory.mapped.is_some());
}

#[test]
fn test_replay_allocate_image_memory_sizes_to_image() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();

    let (p_create_info, info) = t.pod(&ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO.as_raw(),
        image_type: vk::ImageType::TYPE_2D.as_raw(),
        format: vk::Format::R8G8B8A8_UNORM.as_raw(),
        extent: [16, 8, 1],
        mip_levels: 2,
        array_layers: 1,
        samples: 1,
        usage: vk::ImageUsageFlags::SAMPLED.as_raw(),
        ..Zeroable::zeroed()
    });
    let (p_image, written) = t.output(IMAGE);
    let cmd = common::command(
        CommandArgs::CreateImage { device: DEVICE, p_create_info, p_allocator: 0, p_image },
        vec![info],
        vec![written],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();

    let mut properties: PhysicalDeviceMemoryProperties = Zeroable::zeroed();
    properties.memory_type_count = 2;
    properties.memory_types[0] =
        MemoryType { property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw(), heap_index: 0 };
    properties.memory_types[1] =
        MemoryType { property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw(), heap_index: 0 };
    let (p_memory_properties, read) = t.pod(&properties);
    let (p_memory, written) = t.output(MEMORY);
    let cmd = common::command(
        CommandArgs::ReplayAllocateImageMemory { device: DEVICE, p_memory_properties, image: IMAGE, p_memory },
        vec![read],
        vec![written],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();

    // 16x8 and 8x4 texels of four bytes each.
    let memory = m.state.device_memory(MEMORY).unwrap();
    assert_eq!(memory.size, (16 * 8 + 8 * 4) * 4);
    assert_eq!(memory.memory_type_index, 1);
}

#[test]
fn test_sparse_bind_to_unknown_memory_continues() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    common::create_semaphore(&mut t, &mut m, SEMAPHORE).unwrap();

    let (p_binds, binds) = t.pod(&SparseMemoryBind {
        resource_offset: 0,
        size: 65536,
        memory: 0xDEAD,
        ..Zeroable::zeroed()
    });
    let (p_buffer_binds, buffer_binds) =
        t.pod(&SparseBufferMemoryBindInfo { buffer: 0x6300, bind_count: 1, p_binds, ..Zeroable::zeroed() });
    let (p_signals, signals) = t.slice(&[SEMAPHORE.0]);
    let (p_bind_info, info) = t.pod(&BindSparseInfo {
        s_type: vk::StructureType::BIND_SPARSE_INFO.as_raw(),
        buffer_bind_count: 1,
        p_buffer_binds,
        signal_semaphore_count: 1,
        p_signal_semaphores: p_signals,
        ..Zeroable::zeroed()
    });
    let cmd = common::command(
        CommandArgs::QueueBindSparse { queue: QUEUE, bind_info_count: 1, p_bind_info, fence: Handle::NULL },
        vec![binds, buffer_binds, signals, info],
        vec![],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();

    assert!(m.state.semaphore(SEMAPHORE).unwrap().signaled);
    assert!(m.state.issues.is_empty());
}
