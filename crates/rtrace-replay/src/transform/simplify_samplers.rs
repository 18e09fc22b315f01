use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::layout::SamplerCreateInfo;
use tracing::trace;

use super::{apply_reads, write_patched, Transform, Writer};
use crate::error::Result;

/// Forces nearest filtering on every sampler.
#[derive(Debug, Default)]
pub struct SimplifySamplers;

impl Transform for SimplifySamplers {
    fn name(&self) -> &'static str {
        "simplify_samplers"
    }

    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        let CommandArgs::CreateSampler { device, p_create_info, p_allocator, p_sampler } = cmd.args else {
            return out.write(id, cmd);
        };
        if p_create_info == 0 {
            return out.write(id, cmd);
        }
        apply_reads(out, cmd)?;
        let info: SamplerCreateInfo = out.state().memory.read_pod(p_create_info);
        let nearest = vk::Filter::NEAREST.as_raw();
        let patched = SamplerCreateInfo {
            mag_filter: nearest,
            min_filter: nearest,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST.as_raw(),
            ..info
        };
        let alloc = out.state().alloc_pod(&patched)?;
        trace!("{}: sampler filtering forced to nearest", id);
        let replacement = cmd.derive(CommandArgs::CreateSampler {
            device,
            p_create_info: alloc.address(),
            p_allocator,
            p_sampler,
        });
        write_patched(out, id, replacement, vec![alloc])
    }
}
