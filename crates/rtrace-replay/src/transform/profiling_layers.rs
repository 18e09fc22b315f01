use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::layout::InstanceCreateInfo;
use tracing::debug;

use super::{apply_reads, write_patched, Transform, Writer};
use crate::alloc::AllocResult;
use crate::error::Result;

/// Appends layers to every instance the replay creates.
#[derive(Debug)]
pub struct InjectProfilingLayers {
    layers: Vec<String>,
}

impl InjectProfilingLayers {
    pub fn new(layers: Vec<String>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Stage a copy of the create info at `p_create_info` enabling `layers`
    /// on top of its own. The patched struct is the last allocation.
    fn stage(out: &mut dyn Writer, p_create_info: u64, layers: &[String], allocs: &mut Vec<AllocResult>) -> Result<u64> {
        let state = out.state();
        let info: InstanceCreateInfo = state.memory.read_pod(p_create_info);
        let mut pointers: Vec<u64> = if info.pp_enabled_layer_names == 0 {
            Vec::new()
        } else {
            state.memory.read_slice(info.pp_enabled_layer_names, info.enabled_layer_count as usize)
        };
        for layer in layers {
            let a = state.alloc_cstring(layer)?;
            pointers.push(a.address());
            allocs.push(a);
        }
        let names = state.alloc_pod_slice(&pointers)?;
        let patched = InstanceCreateInfo {
            enabled_layer_count: pointers.len() as u32,
            pp_enabled_layer_names: names.address(),
            ..info
        };
        allocs.push(names);
        let a = state.alloc_pod(&patched)?;
        let address = a.address();
        allocs.push(a);
        Ok(address)
    }
}

impl Transform for InjectProfilingLayers {
    fn name(&self) -> &'static str {
        "profiling_layers"
    }

    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        let CommandArgs::CreateInstance { p_create_info, p_allocator, p_instance } = cmd.args else {
            return out.write(id, cmd);
        };
        if p_create_info == 0 {
            return out.write(id, cmd);
        }
        apply_reads(out, cmd)?;

        let state = out.state();
        let info: InstanceCreateInfo = state.memory.read_pod(p_create_info);
        let enabled = state.read_cstr_array(info.pp_enabled_layer_names, info.enabled_layer_count);
        let missing: Vec<String> = self.layers.iter().filter(|l| !enabled.contains(l)).cloned().collect();
        if missing.is_empty() {
            return out.write(id, cmd);
        }
        debug!("{}: enabling layers {:?}", id, missing);

        let mut allocs = Vec::new();
        let p_create_info = match Self::stage(out, p_create_info, &missing, &mut allocs) {
            Ok(address) => address,
            Err(e) => {
                out.state().free_all(allocs)?;
                return Err(e);
            }
        };
        let replacement = cmd.derive(CommandArgs::CreateInstance { p_create_info, p_allocator, p_instance });
        write_patched(out, id, replacement, allocs)
    }
}
