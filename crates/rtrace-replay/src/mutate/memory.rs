use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::layout::{BaseHeader, P_NEXT_OFFSET};
use tracing::debug;

use super::Mutator;
use crate::error::Result;

/// Trace-time file descriptors mean nothing on the replay device, so any
/// `VkImportMemoryFdInfoKHR` is unlinked from the allocation's pNext chain.
pub(super) fn allocate_memory(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    let CommandArgs::AllocateMemory { p_allocate_info, .. } = cmd.args else {
        return m.default_mutate(id, cmd);
    };
    if !m.has_builder() || p_allocate_info == 0 {
        return m.default_mutate(id, cmd);
    }
    m.apply_reads(cmd)?;

    let state = &mut *m.state;
    let header: BaseHeader = state.memory.read_pod(p_allocate_info);
    let chain = state.pnext_chain(header.p_next);
    let import = vk::StructureType::IMPORT_MEMORY_FD_INFO_KHR.as_raw();
    let Some(position) = chain.iter().position(|&(_, s_type)| s_type == import) else {
        return m.default_mutate(id, cmd);
    };

    let (import_address, _) = chain[position];
    let previous = if position == 0 { p_allocate_info } else { chain[position - 1].0 };
    let import_header: BaseHeader = state.memory.read_pod(import_address);
    state.memory.write_pod(previous + P_NEXT_OFFSET, &import_header.p_next);
    debug!("unlinked fd import at {:#x} from allocation info {:#x}", import_address, p_allocate_info);

    let mut replacement = cmd.derive(cmd.args.clone());
    replacement.add_read(state.observe(previous + P_NEXT_OFFSET, 8));
    m.default_mutate(id, &replacement)
}
