use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandId};
use crate::handle::{Handle, HandleKind};

/// A handle created by a replayed call, and the volatile slot the replayer
/// stores the live value into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct HandleSlot {
    pub kind: HandleKind,
    pub trace: Handle,
    /// Byte offset of the 8-byte slot in the volatile area.
    pub offset: u64,
}

/// Memory a replayer reports back to the host after executing a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum NotifySource {
    /// Bytes of the volatile scratch area.
    Scratch { address: u64, size: u64 },
    /// Bytes of a mapped device-memory object.
    MappedMemory { memory: Handle, offset: u64, size: u64 },
}

/// One step of the replay program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum Instruction {
    /// Execute a command; store each created handle into its slot.
    Call {
        id: CommandId,
        command: Command,
        outputs: Vec<HandleSlot>,
    },
    /// Copy bytes between volatile addresses.
    Copy { dst: u64, src: u64, size: u64 },
    /// Send the bytes of `source` back tagged with `id`.
    Notify { id: u64, source: NotifySource },
}
