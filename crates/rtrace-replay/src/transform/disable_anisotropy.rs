use rtrace_protocol::command::{Command, CommandArgs, CommandId};
use rtrace_protocol::layout::{DeviceCreateInfo, PhysicalDeviceFeatures, SamplerCreateInfo};
use tracing::debug;

use super::{apply_reads, write_patched, Transform, Writer};
use crate::error::Result;

/// Turns off anisotropic filtering on samplers and the `samplerAnisotropy`
/// feature on devices.
#[derive(Debug, Default)]
pub struct DisableAnisotropy;

impl DisableAnisotropy {
    fn sampler(&self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        let CommandArgs::CreateSampler { device, p_create_info, p_allocator, p_sampler } = cmd.args else {
            return out.write(id, cmd);
        };
        if p_create_info == 0 {
            return out.write(id, cmd);
        }
        apply_reads(out, cmd)?;
        let info: SamplerCreateInfo = out.state().memory.read_pod(p_create_info);
        if info.anisotropy_enable == 0 {
            return out.write(id, cmd);
        }
        let alloc = out.state().alloc_pod(&SamplerCreateInfo { anisotropy_enable: 0, max_anisotropy: 1.0, ..info })?;
        let replacement = cmd.derive(CommandArgs::CreateSampler {
            device,
            p_create_info: alloc.address(),
            p_allocator,
            p_sampler,
        });
        write_patched(out, id, replacement, vec![alloc])
    }

    fn device(&self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        let CommandArgs::CreateDevice { physical_device, p_create_info, p_allocator, p_device } = cmd.args else {
            return out.write(id, cmd);
        };
        if p_create_info == 0 {
            return out.write(id, cmd);
        }
        apply_reads(out, cmd)?;
        let info: DeviceCreateInfo = out.state().memory.read_pod(p_create_info);
        if info.p_enabled_features == 0 {
            return out.write(id, cmd);
        }
        let mut features: PhysicalDeviceFeatures = out.state().memory.read_pod(info.p_enabled_features);
        if features.features[PhysicalDeviceFeatures::SAMPLER_ANISOTROPY] == 0 {
            return out.write(id, cmd);
        }
        features.features[PhysicalDeviceFeatures::SAMPLER_ANISOTROPY] = 0;
        debug!("{}: samplerAnisotropy disabled", id);

        let features = out.state().alloc_pod(&features)?;
        let patched = DeviceCreateInfo { p_enabled_features: features.address(), ..info };
        let info = match out.state().alloc_pod(&patched) {
            Ok(a) => a,
            Err(e) => {
                out.state().free(features)?;
                return Err(e);
            }
        };
        let replacement = cmd.derive(CommandArgs::CreateDevice {
            physical_device,
            p_create_info: info.address(),
            p_allocator,
            p_device,
        });
        write_patched(out, id, replacement, vec![features, info])
    }
}

impl Transform for DisableAnisotropy {
    fn name(&self) -> &'static str {
        "disable_anisotropy"
    }

    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        match cmd.args {
            CommandArgs::CreateSampler { .. } => self.sampler(id, cmd, out),
            CommandArgs::CreateDevice { .. } => self.device(id, cmd, out),
            _ => out.write(id, cmd),
        }
    }
}
