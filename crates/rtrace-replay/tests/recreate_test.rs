mod common;

use ash::vk;
use bytemuck::Zeroable;
use common::{Trace, DEVICE, POOL_BASE, QUEUE};
use rtrace_protocol::command::{Command, CommandArgs, CommandKind};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::instruction::Instruction;
use rtrace_protocol::layout::{
    BufferCreateInfo, FenceCreateInfo, ImageCreateInfo, MemoryAllocateInfo, SemaphoreCreateInfo,
};
use rtrace_replay::mutate::Mutator;
use rtrace_replay::replay_builder::InstructionStream;

const MEMORY: Handle = Handle(0x6000);
const BUFFER: Handle = Handle(0x6100);
const IMAGE: Handle = Handle(0x6200);
const SEMAPHORE: Handle = Handle(0x6300);
const FENCE: Handle = Handle(0x6400);

fn calls(stream: &InstructionStream) -> Vec<&Command> {
    stream
        .instructions()
        .iter()
        .filter_map(|i| match i {
            Instruction::Call { command, .. } => Some(command),
            _ => None,
        })
        .collect()
}

fn kinds_after(stream: &InstructionStream, start: usize) -> Vec<CommandKind> {
    calls(stream)[start..].iter().map(|c| c.kind()).collect()
}

fn recreate_memory(t: &mut Trace, m: &mut Mutator<'_>) {
    let (p_allocate_info, info) = t.pod(&MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO.as_raw(),
        allocation_size: 1 << 16,
        ..Zeroable::zeroed()
    });
    let (p_memory, written) = t.output(MEMORY);
    let cmd = common::command(
        CommandArgs::RecreateDeviceMemory {
            device: DEVICE,
            p_allocate_info,
            mapped_offset: 0,
            mapped_size: 0,
            mapped_location: 0,
            p_memory,
        },
        vec![info],
        vec![written],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();
}

fn recreate_image(t: &mut Trace, m: &mut Mutator<'_>, layout: vk::ImageLayout, data: &[u8]) {
    let (p_create_info, info) = t.pod(&ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO.as_raw(),
        image_type: vk::ImageType::TYPE_2D.as_raw(),
        format: vk::Format::R8G8B8A8_UNORM.as_raw(),
        extent: [4, 4, 1],
        mip_levels: 1,
        array_layers: 1,
        samples: 1,
        usage: (vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST).as_raw(),
        ..Zeroable::zeroed()
    });
    let mut reads = vec![info];
    let p_data = if data.is_empty() {
        0
    } else {
        let (p_data, o) = t.bytes(data);
        reads.push(o);
        p_data
    };
    let (p_image, written) = t.output(IMAGE);
    let cmd = common::command(
        CommandArgs::RecreateImage {
            device: DEVICE,
            queue: QUEUE,
            p_create_info,
            memory: MEMORY,
            memory_offset: 0,
            layout: layout.as_raw(),
            p_data,
            data_size: data.len() as u64,
            p_image,
        },
        reads,
        vec![written],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();
}

#[test]
fn test_recreate_fence_created_signaled() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        let (p_create_info, info) = t.pod(&FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO.as_raw(),
            ..Zeroable::zeroed()
        });
        let (p_fence, written) = t.output(FENCE);
        let cmd = common::command(
            CommandArgs::RecreateFence { device: DEVICE, p_create_info, signaled: true, p_fence },
            vec![info],
            vec![written],
        );
        let id = t.id();
        m.mutate(id, &cmd).unwrap();
    }

    assert!(state.fence(FENCE).unwrap().signaled);
    let emitted = calls(&stream);
    let CommandArgs::RecreateFence { p_create_info, .. } = emitted.last().unwrap().args else {
        panic!("fence not recreated last");
    };
    assert!(p_create_info >= POOL_BASE);
    assert_eq!(state.allocator().live_count(), 0);
}

#[test]
fn test_recreate_semaphore_signaled_by_empty_submit() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        let (p_create_info, info) = t.pod(&SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO.as_raw(),
            ..Zeroable::zeroed()
        });
        let (p_semaphore, written) = t.output(SEMAPHORE);
        let cmd = common::command(
            CommandArgs::RecreateSemaphore { device: DEVICE, p_create_info, signaled_on_queue: QUEUE, p_semaphore },
            vec![info],
            vec![written],
        );
        let id = t.id();
        m.mutate(id, &cmd).unwrap();
    }

    assert!(state.semaphore(SEMAPHORE).unwrap().signaled);
    let emitted: Vec<CommandKind> = calls(&stream).iter().map(|c| c.kind()).collect();
    let n = emitted.len();
    assert_eq!(emitted[n - 2..], [CommandKind::RecreateSemaphore, CommandKind::QueueSubmit]);
}

#[test]
fn test_recreate_semaphore_without_builder() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    let (p_create_info, info) = t.pod(&SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO.as_raw(),
        ..Zeroable::zeroed()
    });
    let (p_semaphore, written) = t.output(SEMAPHORE);
    let cmd = common::command(
        CommandArgs::RecreateSemaphore { device: DEVICE, p_create_info, signaled_on_queue: QUEUE, p_semaphore },
        vec![info],
        vec![written],
    );
    let id = t.id();
    m.mutate(id, &cmd).unwrap();
    assert!(m.state.semaphore(SEMAPHORE).unwrap().signaled);
}

#[test]
fn test_recreate_buffer_uploads_contents() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let data: Vec<u8> = (0..64u8).collect();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        recreate_memory(&mut t, &mut m);

        let (p_create_info, info) = t.pod(&BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO.as_raw(),
            size: 64,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER.as_raw(),
            ..Zeroable::zeroed()
        });
        let (p_data, contents) = t.bytes(&data);
        let (p_buffer, written) = t.output(BUFFER);
        let cmd = common::command(
            CommandArgs::RecreateBuffer {
                device: DEVICE,
                queue: QUEUE,
                p_create_info,
                memory: MEMORY,
                memory_offset: 0,
                p_data,
                p_buffer,
            },
            vec![info, contents],
            vec![written],
        );
        let id = t.id();
        m.mutate(id, &cmd).unwrap();
    }

    let buffer = state.buffer(BUFFER).unwrap();
    assert!(buffer.usage.contains(vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER));
    assert_eq!(state.device_memory(MEMORY).unwrap().contents.read_vec(0, 64), data);

    let emitted = calls(&stream);
    let recreate = emitted.iter().position(|c| c.kind() == CommandKind::RecreateBuffer).unwrap();
    let CommandArgs::RecreateBuffer { p_create_info, .. } = emitted[recreate].args else {
        unreachable!()
    };
    assert!(p_create_info >= POOL_BASE);
    let after = kinds_after(&stream, recreate);
    let copy = after.iter().position(|k| *k == CommandKind::CmdCopyBuffer).unwrap();
    let submit = after.iter().position(|k| *k == CommandKind::QueueSubmit).unwrap();
    assert!(copy < submit);
    assert_eq!(state.allocator().live_count(), 0);
}

#[test]
fn test_recreate_image_in_undefined_layout_is_not_primed() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        recreate_memory(&mut t, &mut m);
        recreate_image(&mut t, &mut m, vk::ImageLayout::UNDEFINED, &[0xAB; 64]);
    }

    assert_eq!(calls(&stream).last().unwrap().kind(), CommandKind::RecreateImage);
    assert_eq!(state.image(IMAGE).unwrap().layout, vk::ImageLayout::UNDEFINED);
}

#[test]
fn test_recreate_image_without_contents_is_transitioned() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        recreate_memory(&mut t, &mut m);
        recreate_image(&mut t, &mut m, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, &[]);
    }

    let emitted = calls(&stream);
    let recreate = emitted.iter().position(|c| c.kind() == CommandKind::RecreateImage).unwrap();
    let after = kinds_after(&stream, recreate);
    assert!(after.contains(&CommandKind::CmdPipelineBarrier));
    assert!(after.contains(&CommandKind::QueueSubmit));
    assert_eq!(state.image(IMAGE).unwrap().layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(state.allocator().live_count(), 0);
}
