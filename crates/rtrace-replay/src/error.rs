use ash::vk;
use rtrace_protocol::command::CommandKind;
use rtrace_protocol::handle::{Handle, HandleKind};
use rtrace_protocol::observation::{Range, ResourceId};

/// Errors that abort the mutation of the current command.
///
/// Nothing already applied to the shadow state is rolled back; callers stop
/// processing the command and treat the build of that command as failed.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("observation {range} references unknown resource {id}")]
    UnresolvedObservation { range: Range, id: ResourceId },

    #[error("observation {range} holds {actual} bytes in resource {id}")]
    ObservationSizeMismatch { range: Range, id: ResourceId, actual: usize },

    /// The transient pool cannot satisfy a request. Always fatal.
    #[error("allocation of {size} bytes failed: {used} of {capacity} bytes in use")]
    AllocationExhausted { size: u64, used: u64, capacity: u64 },

    #[error("no live allocation at {0:#x}")]
    UnknownAllocation(u64),

    #[error("{kind} {handle} not found in shadow state")]
    MissingObject { kind: HandleKind, handle: Handle },

    #[error("malformed {command}: {reason}")]
    Malformed { command: CommandKind, reason: String },

    #[error("cannot prime format {format:?} aspect {aspect:?}: {message}")]
    UnsupportedFormat {
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        message: String,
    },

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("descriptor set pool has been freed")]
    PoolFreed,

    #[error("reservation used after its pool was flushed")]
    InvalidReservation,

    #[error("replay builder: {0}")]
    Builder(String),

    #[error(transparent)]
    Protocol(#[from] rtrace_protocol::ProtocolError),

    #[error(transparent)]
    Core(#[from] rtrace_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReplayError>;

impl ReplayError {
    pub fn missing(kind: HandleKind, handle: Handle) -> Self {
        ReplayError::MissingObject { kind, handle }
    }

    pub fn malformed(command: CommandKind, reason: impl Into<String>) -> Self {
        ReplayError::Malformed { command, reason: reason.into() }
    }
}
