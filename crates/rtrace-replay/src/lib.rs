pub mod alloc;
pub mod cmd_builder;
pub mod error;
pub mod format;
pub mod memory;
pub mod mutate;
pub mod observations;
pub mod pool;
pub mod primer;
pub mod replay_builder;
pub mod state;
pub mod transform;

pub use error::{ReplayError, Result};
pub use mutate::{Mutator, SubmitRewriter};
pub use pool::{FlushPolicy, HomogeneousDescriptorSetPool, Reservation};
pub use primer::{ImagePrimer, PrimeRequest, ShaderCompiler};
pub use replay_builder::{Checkpoint, InstructionStream, NotificationRegistry, ReplayBuilder};
pub use state::{ReplayOptions, State};
pub use transform::{Pipeline, Transform, Writer};
