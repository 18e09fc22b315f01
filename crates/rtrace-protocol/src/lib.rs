pub mod command;
pub mod error;
pub mod handle;
pub mod instruction;
pub mod layout;
pub mod observation;
pub mod wire;

pub use command::{Command, CommandArgs, CommandId, CommandKind, Extras};
pub use error::ProtocolError;
pub use handle::{Handle, HandleKind};
pub use instruction::{HandleSlot, Instruction, NotifySource};
pub use observation::{Observation, Observations, Range, ResourceId};
