mod common;

use ash::vk;
use bytemuck::Zeroable;
use common::{Trace, DEVICE, INSTANCE};
use rtrace_protocol::command::{CommandArgs, CommandKind, SurfaceOverride, SurfacePlatform};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::instruction::Instruction;
use rtrace_protocol::layout::{BaseHeader, SwapchainCreateInfoKhr, VirtualSwapchainPNext, VIRTUAL_SWAPCHAIN_PNEXT};
use rtrace_protocol::observation::Observation;
use rtrace_replay::mutate::{inject_virtual_swapchain, Mutator};
use rtrace_replay::replay_builder::InstructionStream;
use rtrace_replay::transform::Writer;

const SURFACE: Handle = Handle(0x5000);
const SWAPCHAIN: Handle = Handle(0x5100);
const SEMAPHORE: Handle = Handle(0x5200);
const FENCE: Handle = Handle(0x5300);

/// An Xlib surface create info with an empty pNext chain.
fn surface_create_info(t: &mut Trace) -> (u64, Observation) {
    let header = BaseHeader {
        s_type: vk::StructureType::XLIB_SURFACE_CREATE_INFO_KHR.as_raw(),
        _pad0: 0,
        p_next: 0,
    };
    let mut bytes = bytemuck::bytes_of(&header).to_vec();
    // flags, dpy and window
    bytes.resize(40, 0);
    t.bytes(&bytes)
}

fn create_surface(t: &mut Trace, out: &mut dyn Writer, display_to_surface: bool) -> u64 {
    let (p_create_info, info) = surface_create_info(t);
    let (p_surface, handle) = t.output(SURFACE);
    let mut cmd = common::command(
        CommandArgs::CreateSurfaceKhr {
            platform: SurfacePlatform::Xlib,
            instance: INSTANCE,
            p_create_info,
            p_allocator: 0,
            p_surface,
        },
        vec![info],
        vec![handle],
    );
    if display_to_surface {
        cmd.extras.surface_override = Some(SurfaceOverride::DisplayToSurface);
    }
    let id = t.id();
    out.write(id, &cmd).unwrap();
    p_create_info
}

fn create_swapchain(t: &mut Trace, out: &mut dyn Writer) -> u64 {
    let (p_create_info, info) = t.pod(&SwapchainCreateInfoKhr {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR.as_raw(),
        surface: SURFACE.0,
        min_image_count: 3,
        image_format: vk::Format::B8G8R8A8_UNORM.as_raw(),
        image_extent: [640, 480],
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
        ..Zeroable::zeroed()
    });
    let (p_swapchain, handle) = t.output(SWAPCHAIN);
    let cmd = common::command(
        CommandArgs::CreateSwapchainKhr { device: DEVICE, p_create_info, p_allocator: 0, p_swapchain },
        vec![info],
        vec![handle],
    );
    let id = t.id();
    out.write(id, &cmd).unwrap();
    p_create_info
}

fn acquire(t: &mut Trace, out: &mut dyn Writer, semaphore: Handle, fence: Handle, index: u32) -> Observation {
    let (p_image_index, written) = t.pod(&index);
    let cmd = common::command(
        CommandArgs::AcquireNextImageKhr {
            device: DEVICE,
            swapchain: SWAPCHAIN,
            timeout: u64::MAX,
            semaphore,
            fence,
            p_image_index,
        },
        vec![],
        vec![written.clone()],
    );
    let id = t.id();
    out.write(id, &cmd).unwrap();
    written
}

/// The sentinel a create info's pNext points at after mutation.
fn sentinel(m: &mut Mutator<'_>, p_create_info: u64) -> Option<VirtualSwapchainPNext> {
    let header: BaseHeader = m.state.memory.read_pod(p_create_info);
    if header.p_next == 0 {
        return None;
    }
    Some(m.state.memory.read_pod(header.p_next))
}

#[test]
fn test_surface_and_swapchain_carry_sentinel() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let mut m = Mutator::new(&mut state).with_builder(&mut stream);
    common::bring_up(&mut t, &mut m).unwrap();

    let surface_info = create_surface(&mut t, &mut m, false);
    let s = sentinel(&mut m, surface_info).expect("surface sentinel");
    assert_eq!(s.s_type, VIRTUAL_SWAPCHAIN_PNEXT);
    assert_eq!(s.surface_create_info, 0);

    let swapchain_info = create_swapchain(&mut t, &mut m);
    let s = sentinel(&mut m, swapchain_info).expect("swapchain sentinel");
    assert_eq!(s.surface_create_info, 0);

    assert!(m.state.surfaces.contains_key(&SURFACE));
    let swapchain = m.state.swapchain(SWAPCHAIN).unwrap();
    assert_eq!(swapchain.surface, SURFACE);
    assert_eq!(swapchain.extent, [640, 480]);
    assert_eq!(m.state.allocator().live_count(), 0);
}

#[test]
fn test_display_to_surface_points_sentinel_at_create_info() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let mut m = Mutator::new(&mut state).with_builder(&mut stream);
    common::bring_up(&mut t, &mut m).unwrap();

    let surface_info = create_surface(&mut t, &mut m, true);
    let s = sentinel(&mut m, surface_info).unwrap();
    assert_eq!(s.surface_create_info, surface_info);
}

#[test]
fn test_no_sentinel_without_builder() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();
    let surface_info = create_surface(&mut t, &mut m, false);
    assert!(sentinel(&mut m, surface_info).is_none());
}

#[test]
fn test_no_sentinel_when_disabled() {
    let mut t = Trace::new();
    let mut state = t.state_with(rtrace_replay::state::ReplayOptions {
        virtual_swapchain: false,
        ..Default::default()
    });
    let mut stream = InstructionStream::new();
    let mut m = Mutator::new(&mut state).with_builder(&mut stream);
    common::bring_up(&mut t, &mut m).unwrap();
    let surface_info = create_surface(&mut t, &mut m, false);
    assert!(sentinel(&mut m, surface_info).is_none());
}

#[test]
fn test_inject_is_idempotent() {
    let t = Trace::new();
    let mut state = t.state();
    let address = 0x2000_0000;
    let extension = 0x2000_0100;
    state.memory.write_pod(address, &BaseHeader { s_type: 1000, _pad0: 0, p_next: extension });
    state.memory.write_pod(extension, &BaseHeader { s_type: 2000, _pad0: 0, p_next: 0 });

    let first = inject_virtual_swapchain(&mut state, address, 0).unwrap().expect("first injection");
    // The sentinel goes at the end of the existing chain.
    let tail: BaseHeader = state.memory.read_pod(extension);
    assert_eq!(tail.p_next, first.sentinel.address());
    assert_eq!(first.patch.range.base, extension + 8);
    let s: VirtualSwapchainPNext = state.memory.read_pod(first.sentinel.address());
    assert_eq!(s.surface_create_info, 0);
    assert_eq!(s.p_next, 0);

    assert!(inject_virtual_swapchain(&mut state, address, 0).unwrap().is_none());
}

#[test]
fn test_acquire_signals_semaphore_and_records_index() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    let written = {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        create_surface(&mut t, &mut m, false);
        create_swapchain(&mut t, &mut m);
        common::create_semaphore(&mut t, &mut m, SEMAPHORE).unwrap();
        common::create_fence(&mut t, &mut m, FENCE, false).unwrap();
        acquire(&mut t, &mut m, SEMAPHORE, Handle::NULL, 2)
    };

    assert!(state.semaphore(SEMAPHORE).unwrap().signaled);
    assert!(!state.fence(FENCE).unwrap().signaled);
    assert_eq!(state.swapchain(SWAPCHAIN).unwrap().acquired, Some(2));
    assert!(state.issues.is_empty(), "{:?}", state.issues);

    // The traced index is fed to the replay call as input.
    let acquire = stream
        .instructions()
        .iter()
        .find_map(|i| match i {
            Instruction::Call { command, .. } if command.kind() == CommandKind::AcquireNextImageKhr => Some(command),
            _ => None,
        })
        .unwrap();
    assert!(acquire.observations().reads.contains(&written));
}

#[test]
fn test_acquire_signals_fence() {
    let mut t = Trace::new();
    let mut state = t.state();
    {
        let mut m = Mutator::new(&mut state);
        common::bring_up(&mut t, &mut m).unwrap();
        create_surface(&mut t, &mut m, false);
        create_swapchain(&mut t, &mut m);
        common::create_fence(&mut t, &mut m, FENCE, false).unwrap();
        acquire(&mut t, &mut m, Handle::NULL, FENCE, 1);
    }
    assert!(state.fence(FENCE).unwrap().signaled);
    assert_eq!(state.swapchain(SWAPCHAIN).unwrap().acquired, Some(1));
}
