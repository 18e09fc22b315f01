//! Instance and device creation hijacks.
//!
//! With a builder attached, instance and device creation go through the
//! replay harness's own entry points so it can wrap the created objects, and
//! are followed by a registration command. Device creation also drops the
//! extensions the harness cannot provide.

use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::DeviceCreateInfo;
use tracing::debug;

use super::Mutator;
use crate::alloc::AllocResult;
use crate::error::Result;

pub(super) fn create_instance(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    if !m.has_builder() {
        return m.default_mutate(id, cmd);
    }
    let CommandArgs::CreateInstance { p_create_info, p_allocator, p_instance } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    replay_create_instance(m, id, cmd, p_create_info, p_allocator, p_instance)
}

/// Create through the harness entry point, then register the instance.
pub(super) fn replay_create_instance(
    m: &mut Mutator<'_>,
    id: CommandId,
    cmd: &Command,
    p_create_info: u64,
    p_allocator: u64,
    p_instance: u64,
) -> Result<()> {
    let replacement = cmd.derive(CommandArgs::ReplayCreateVkInstance { p_create_info, p_allocator, p_instance });
    m.default_mutate(id, &replacement)?;

    let instance = created_handle(m, p_instance);
    if !instance.is_null() {
        let register = Command::new(cmd.thread, CommandArgs::ReplayRegisterVkInstance { instance });
        m.default_mutate(id, &register)?;
    }
    Ok(())
}

pub(super) fn destroy_instance(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::DestroyInstance { instance, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    m.default_mutate(id, cmd)?;
    if m.has_builder() && !instance.is_null() {
        let unregister = Command::new(cmd.thread, CommandArgs::ReplayUnregisterVkInstance { instance });
        m.default_mutate(id, &unregister)?;
    }
    Ok(())
}

pub(super) fn create_device(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    if !m.has_builder() {
        return m.default_mutate(id, cmd);
    }
    let CommandArgs::CreateDevice { physical_device, p_create_info, p_allocator, p_device } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    replay_create_device(m, id, cmd, physical_device, p_create_info, p_allocator, p_device)
}

/// Create through the harness entry point without the stripped extensions,
/// then register the device.
pub(super) fn replay_create_device(
    m: &mut Mutator<'_>,
    id: CommandId,
    cmd: &Command,
    physical_device: Handle,
    p_create_info: u64,
    p_allocator: u64,
    p_device: u64,
) -> Result<()> {
    m.apply_reads(cmd)?;
    let mut allocs = Vec::new();
    let rewritten = strip_extensions(m, p_create_info, &mut allocs);
    let result = rewritten.and_then(|patched| {
        let create_info = patched.unwrap_or(p_create_info);
        let mut replacement = cmd.derive(CommandArgs::ReplayCreateVkDevice {
            physical_device,
            p_create_info: create_info,
            p_allocator,
            p_device,
        });
        for a in &allocs {
            replacement.add_read(a.read_observation());
        }
        m.default_mutate(id, &replacement)?;

        let device = created_handle(m, p_device);
        if device.is_null() {
            return Ok(());
        }
        let mut register = Command::new(
            cmd.thread,
            CommandArgs::ReplayRegisterVkDevice { physical_device, device, p_create_info: create_info },
        );
        for r in &replacement.observations().reads {
            register.add_read(r.clone());
        }
        m.default_mutate(id, &register)
    });
    m.state.free_all(allocs)?;
    result
}

pub(super) fn destroy_device(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::DestroyDevice { device, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    let mut primer = m.take_primer();
    let released = match primer.as_deref_mut() {
        Some(p) => p.release(m, device),
        None => Ok(()),
    };
    m.restore_primer(primer);
    released?;
    m.default_mutate(id, cmd)?;
    if m.has_builder() && !device.is_null() {
        let unregister = Command::new(cmd.thread, CommandArgs::ReplayUnregisterVkDevice { device });
        m.default_mutate(id, &unregister)?;
    }
    Ok(())
}

/// Copy of the `VkDeviceCreateInfo` at `p_create_info` without the stripped
/// extensions, or `None` if it enables none of them. Every allocation the
/// copy needs is pushed onto `allocs`, the patched struct last.
fn strip_extensions(m: &mut Mutator<'_>, p_create_info: u64, allocs: &mut Vec<AllocResult>) -> Result<Option<u64>> {
    if p_create_info == 0 {
        return Ok(None);
    }
    let state = &mut *m.state;
    let info: DeviceCreateInfo = state.memory.read_pod(p_create_info);
    let names = state.read_cstr_array(info.pp_enabled_extension_names, info.enabled_extension_count);
    let (kept, stripped): (Vec<String>, Vec<String>) = names
        .into_iter()
        .partition(|n| !state.options.strip_device_extensions.iter().any(|s| s == n));
    if stripped.is_empty() {
        return Ok(None);
    }
    debug!("stripping device extensions {:?}", stripped);

    let mut pointers = Vec::with_capacity(kept.len());
    for name in &kept {
        let a = state.alloc_cstring(name)?;
        pointers.push(a.address());
        allocs.push(a);
    }
    let pp_enabled_extension_names = if pointers.is_empty() {
        0
    } else {
        let a = state.alloc_pod_slice(&pointers)?;
        let address = a.address();
        allocs.push(a);
        address
    };

    let patched = DeviceCreateInfo {
        enabled_extension_count: kept.len() as u32,
        pp_enabled_extension_names,
        ..info
    };
    let a = state.alloc_pod(&patched)?;
    let address = a.address();
    allocs.push(a);
    Ok(Some(address))
}

/// The handle a create command left at `p_out`.
pub(super) fn created_handle(m: &Mutator<'_>, p_out: u64) -> Handle {
    if p_out == 0 {
        return Handle::NULL;
    }
    Handle(m.state.memory.read_u64(p_out))
}
