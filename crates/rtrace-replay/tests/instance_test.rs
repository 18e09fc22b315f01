mod common;

use common::{Trace, DEVICE, INSTANCE, PHYSICAL_DEVICE};
use rtrace_protocol::command::{Command, CommandArgs, CommandKind};
use rtrace_protocol::handle::HandleKind;
use rtrace_protocol::instruction::Instruction;
use rtrace_protocol::layout::DeviceCreateInfo;
use rtrace_replay::mutate::Mutator;
use rtrace_replay::replay_builder::InstructionStream;

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

#[test]
fn test_create_device_strips_configured_extensions() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::create_instance(&mut t, &mut m, &[]).unwrap();
        common::enumerate_physical_device(&mut t, &mut m).unwrap();
        common::create_device(&mut t, &mut m, &["VK_EXT_debug_marker", "VK_KHR_swapchain"]).unwrap();
    }

    let device = state.device(DEVICE).unwrap();
    assert_eq!(device.enabled_extensions, vec!["VK_KHR_swapchain".to_string()]);
    assert_eq!(device.physical_device, PHYSICAL_DEVICE);

    let calls = calls(&stream);
    let create = calls
        .iter()
        .find_map(|c| match c.args {
            CommandArgs::ReplayCreateVkDevice { p_create_info, .. } => Some(p_create_info),
            _ => None,
        })
        .expect("device created through the replay entry point");
    let info: DeviceCreateInfo = state.memory.read_pod(create);
    assert_eq!(info.enabled_extension_count, 1);
    assert_eq!(
        state.read_cstr_array(info.pp_enabled_extension_names, info.enabled_extension_count),
        vec!["VK_KHR_swapchain".to_string()]
    );
    assert!(calls.iter().all(|c| c.kind() != CommandKind::CreateDevice));
    assert_eq!(calls.last().map(|c| c.kind()), Some(CommandKind::ReplayRegisterVkDevice));
}

#[test]
fn test_create_device_untouched_without_stripped_extensions() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::create_instance(&mut t, &mut m, &[]).unwrap();
        common::enumerate_physical_device(&mut t, &mut m).unwrap();
        common::create_device(&mut t, &mut m, &["VK_KHR_swapchain"]).unwrap();
    }
    let create = calls(&stream)
        .into_iter()
        .find(|c| c.kind() == CommandKind::ReplayCreateVkDevice)
        .cloned()
        .unwrap();
    // The original create info is passed through, with no patch reads added.
    let original_reads = 3;
    assert_eq!(create.observations().reads.len(), original_reads);
    // Everything the transient allocator handed out went back.
    assert_eq!(state.allocator().live_count(), 0);
}

#[test]
fn test_create_device_without_builder_keeps_extensions() {
    let mut t = Trace::new();
    let mut state = t.state();
    {
        let mut m = Mutator::new(&mut state);
        common::create_instance(&mut t, &mut m, &[]).unwrap();
        common::enumerate_physical_device(&mut t, &mut m).unwrap();
        common::create_device(&mut t, &mut m, &["VK_EXT_debug_marker", "VK_KHR_swapchain"]).unwrap();
    }
    assert_eq!(state.device(DEVICE).unwrap().enabled_extensions.len(), 2);
}

#[test]
fn test_create_instance_goes_through_replay_entry_point() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::create_instance(&mut t, &mut m, &["VK_LAYER_KHRONOS_validation"]).unwrap();
    }
    let kinds: Vec<CommandKind> = calls(&stream).iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec![CommandKind::ReplayCreateVkInstance, CommandKind::ReplayRegisterVkInstance]);
    assert!(stream.slot(HandleKind::Instance, INSTANCE).is_some());
    assert_eq!(
        state.instance(INSTANCE).unwrap().enabled_layers,
        vec!["VK_LAYER_KHRONOS_validation".to_string()]
    );
}

#[test]
fn test_destroy_device_unregisters() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut stream = InstructionStream::new();
    {
        let mut m = Mutator::new(&mut state).with_builder(&mut stream);
        common::bring_up(&mut t, &mut m).unwrap();
        let destroy = common::command(CommandArgs::DestroyDevice { device: DEVICE, p_allocator: 0 }, vec![], vec![]);
        let id = t.id();
        rtrace_replay::transform::Writer::write(&mut m, id, &destroy).unwrap();
    }
    assert!(state.device(DEVICE).is_err());
    assert!(state.queues.is_empty());
    let kinds: Vec<CommandKind> = calls(&stream).iter().map(|c| c.kind()).collect();
    assert_eq!(&kinds[kinds.len() - 2..], &[CommandKind::DestroyDevice, CommandKind::ReplayUnregisterVkDevice]);
}
