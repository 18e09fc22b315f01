//! Composable passes that rewrite the command stream before it is mutated.
//!
//! A [`Pipeline`] hands every command to its first [`Transform`]; each pass
//! writes zero or more commands to the next link, and the last link writes
//! into the sink, normally a [`Mutator`](crate::mutate::Mutator).

pub mod disable_anisotropy;
pub mod file_log;
pub mod handle_mapping;
pub mod minimize_textures;
pub mod profiling_layers;
pub mod readback;
pub mod simplify_samplers;

use rtrace_core::config::TransformConfig;
use rtrace_protocol::command::{Command, CommandId};
use rtrace_protocol::handle::Handle;
use tracing::{debug, info};

use crate::alloc::AllocResult;
use crate::cmd_builder::Synth;
use crate::error::Result;
use crate::observations;
use crate::replay_builder::ReplayBuilder;
use crate::state::State;

pub use disable_anisotropy::DisableAnisotropy;
pub use file_log::FileLog;
pub use handle_mapping::HandleMappingExporter;
pub use minimize_textures::MinimizeTextures;
pub use profiling_layers::InjectProfilingLayers;
pub use readback::{DataUnavailable, FramebufferData, FramebufferReadback, ReadbackCallback};
pub use simplify_samplers::SimplifySamplers;

/// Where a transform writes its output.
pub trait Writer {
    fn state(&mut self) -> &mut State;

    fn write(&mut self, id: CommandId, cmd: &Command) -> Result<()>;

    /// The replay builder at the end of the chain, if one is attached.
    fn builder(&mut self) -> Option<&mut dyn ReplayBuilder>;

    /// Write a synthesized command, then free its allocations whether or not
    /// the write succeeded. Returns the handle the command creates, if any.
    fn write_synth(&mut self, synth: Synth) -> Result<Option<Handle>> {
        let Synth { cmd, allocs, handle } = synth;
        let written = self.write(CommandId::NONE, &cmd);
        let freed = self.state().free_all(allocs);
        written?;
        freed?;
        Ok(handle)
    }

    /// Write a synthesized command and hand its allocations back to the
    /// caller, who frees them once later commands no longer need them.
    fn write_synth_keep(&mut self, synth: Synth) -> Result<(Option<Handle>, Vec<AllocResult>)> {
        let Synth { cmd, allocs, handle } = synth;
        if let Err(e) = self.write(CommandId::NONE, &cmd) {
            self.state().free_all(allocs)?;
            return Err(e);
        }
        Ok((handle, allocs))
    }
}

/// One rewriting pass.
pub trait Transform {
    fn name(&self) -> &'static str;

    /// Write `cmd`, or whatever replaces it, to `out`.
    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()>;

    /// Called once after the last command.
    fn flush(&mut self, _out: &mut dyn Writer) -> Result<()> {
        Ok(())
    }
}

/// Apply the reads of `cmd` so a pass can inspect the memory they cover.
pub(crate) fn apply_reads(out: &mut dyn Writer, cmd: &Command) -> Result<()> {
    let state = out.state();
    observations::apply(&cmd.observations().reads, &mut state.memory, &state.store)
}

/// Write `cmd` with every patch appended as a read, then free the patches.
pub(crate) fn write_patched(
    out: &mut dyn Writer,
    id: CommandId,
    mut cmd: Command,
    patches: Vec<AllocResult>,
) -> Result<()> {
    for p in &patches {
        cmd.add_read(p.read_observation());
    }
    let written = out.write(id, &cmd);
    let freed = out.state().free_all(patches);
    written?;
    freed?;
    Ok(())
}

/// Ordered chain of transforms.
#[derive(Default)]
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The passes enabled in `config`, in their fixed order.
    /// Framebuffer readback is attached by the caller since it needs a callback.
    pub fn from_config(config: &TransformConfig) -> Result<Self> {
        let mut pipeline = Self::new();
        if let Some(max_extent) = config.minimize_textures {
            pipeline.push(Box::new(MinimizeTextures::new(max_extent)));
        }
        if config.simplify_samplers {
            pipeline.push(Box::new(SimplifySamplers));
        }
        if config.disable_anisotropy {
            pipeline.push(Box::new(DisableAnisotropy));
        }
        if !config.profiling_layers.is_empty() {
            pipeline.push(Box::new(InjectProfilingLayers::new(config.profiling_layers.clone())));
        }
        if let Some(path) = &config.command_log {
            pipeline.push(Box::new(FileLog::create(path)?));
        }
        if let Some(path) = &config.handle_mapping {
            pipeline.push(Box::new(HandleMappingExporter::new(path)));
        }
        info!("transform pipeline: {:?}", pipeline.names());
        Ok(pipeline)
    }

    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Run `cmd` through every pass into `sink`.
    pub fn run(&mut self, id: CommandId, cmd: &Command, sink: &mut dyn Writer) -> Result<()> {
        let mut link = Link { rest: &mut self.transforms, sink };
        link.write(id, cmd)
    }

    /// Flush every pass in order; output of each flows through the passes after it.
    pub fn flush(&mut self, sink: &mut dyn Writer) -> Result<()> {
        for i in 0..self.transforms.len() {
            let Some((head, rest)) = self.transforms[i..].split_first_mut() else {
                break;
            };
            debug!("flushing {}", head.name());
            let mut link = Link { rest, sink: &mut *sink };
            head.flush(&mut link)?;
        }
        Ok(())
    }
}

/// The part of a pipeline downstream of one transform.
struct Link<'a, 'w> {
    rest: &'a mut [Box<dyn Transform>],
    sink: &'a mut (dyn Writer + 'w),
}

impl Writer for Link<'_, '_> {
    fn state(&mut self) -> &mut State {
        self.sink.state()
    }

    fn write(&mut self, id: CommandId, cmd: &Command) -> Result<()> {
        match self.rest.split_first_mut() {
            Some((head, rest)) => {
                let mut next = Link { rest, sink: &mut *self.sink };
                head.transform(id, cmd, &mut next)
            }
            None => self.sink.write(id, cmd),
        }
    }

    fn builder(&mut self) -> Option<&mut dyn ReplayBuilder> {
        self.sink.builder()
    }
}
