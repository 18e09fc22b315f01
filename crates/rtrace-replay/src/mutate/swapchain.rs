//! Virtual swapchain hijacks.
//!
//! Surfaces and swapchains created for replay carry a private pNext entry the
//! replay-side swapchain layer recognises. Acquired image indices are taken
//! from the trace instead of the replay device.

use bytemuck::Zeroable;
use rtrace_protocol::command::{Command, CommandArgs, CommandId, SurfaceOverride};
use rtrace_protocol::layout::{BaseHeader, VirtualSwapchainPNext, P_NEXT_OFFSET, VIRTUAL_SWAPCHAIN_PNEXT};
use rtrace_protocol::observation::Observation;
use tracing::debug;

use super::Mutator;
use crate::alloc::AllocResult;
use crate::error::Result;
use crate::state::State;

/// A sentinel spliced into a pNext chain.
pub struct Injection {
    /// The sentinel struct itself.
    pub sentinel: AllocResult,
    /// The rewritten `pNext` field that now points at the sentinel.
    pub patch: Observation,
}

/// Append the virtual-swapchain sentinel to the pNext chain of the struct at
/// `p_create_info`. Returns `None` if the chain already carries one.
pub fn inject_virtual_swapchain(
    state: &mut State,
    p_create_info: u64,
    surface_create_info: u64,
) -> Result<Option<Injection>> {
    let header: BaseHeader = state.memory.read_pod(p_create_info);
    let chain = state.pnext_chain(header.p_next);
    if chain.iter().any(|&(_, s_type)| s_type == VIRTUAL_SWAPCHAIN_PNEXT) {
        return Ok(None);
    }
    let sentinel = state.alloc_pod(&VirtualSwapchainPNext {
        s_type: VIRTUAL_SWAPCHAIN_PNEXT,
        surface_create_info,
        ..Zeroable::zeroed()
    })?;
    let tail = chain.last().map_or(p_create_info, |&(address, _)| address);
    state.memory.write_pod(tail + P_NEXT_OFFSET, &sentinel.address());
    let patch = state.observe(tail + P_NEXT_OFFSET, 8);
    debug!("virtual swapchain sentinel at {:#x} after {:#x}", sentinel.address(), tail);
    Ok(Some(Injection { sentinel, patch }))
}

pub(super) fn virtual_swapchain_enabled(m: &Mutator<'_>) -> bool {
    m.has_builder() && m.state.options.virtual_swapchain
}

/// Mutate `cmd` with the sentinel injected into the chain at `p_create_info`.
pub(super) fn mutate_injected(
    m: &mut Mutator<'_>,
    id: CommandId,
    cmd: &Command,
    p_create_info: u64,
    surface_create_info: u64,
) -> Result<()> {
    if p_create_info == 0 {
        return m.default_mutate(id, cmd);
    }
    m.apply_reads(cmd)?;
    let Some(injection) = inject_virtual_swapchain(m.state, p_create_info, surface_create_info)? else {
        return m.default_mutate(id, cmd);
    };
    let mut replacement = cmd.derive(cmd.args.clone());
    replacement.add_read(injection.sentinel.read_observation());
    replacement.add_read(injection.patch);
    let result = m.default_mutate(id, &replacement);
    m.state.free(injection.sentinel)?;
    result
}

pub(super) fn create_surface(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::CreateSurfaceKhr { p_create_info, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    if !virtual_swapchain_enabled(m) {
        return m.default_mutate(id, cmd);
    }
    let surface_create_info = match cmd.extras.surface_override {
        Some(SurfaceOverride::DisplayToSurface) => p_create_info,
        None => 0,
    };
    mutate_injected(m, id, cmd, p_create_info, surface_create_info)
}

pub(super) fn create_swapchain(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::CreateSwapchainKhr { p_create_info, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    if !virtual_swapchain_enabled(m) {
        return m.default_mutate(id, cmd);
    }
    mutate_injected(m, id, cmd, p_create_info, 0)
}

/// With a builder, the traced image index is written before the call so the
/// replay device hands out the same image. The semaphore and fence are
/// signalled in the shadow state either way.
pub(super) fn acquire_next_image(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    if !m.has_builder() {
        return m.default_mutate(id, cmd);
    }
    m.apply_reads(cmd)?;
    m.apply_writes(cmd)?;
    let mut replacement = cmd.derive(cmd.args.clone());
    for w in &cmd.observations().writes {
        replacement.add_read(w.clone());
    }
    m.default_mutate(id, &replacement)
}
