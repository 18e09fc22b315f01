//! Outgoing replay program: the sink mutated commands are appended to.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rtrace_protocol::command::{Command, CommandId};
use rtrace_protocol::handle::{Handle, HandleKind};
use rtrace_protocol::instruction::{HandleSlot, Instruction, NotifySource};
use rtrace_protocol::wire::{Record, RecordWriter};
use tracing::{debug, trace, warn};

use crate::alloc::align_up;
use crate::error::Result;

/// Start of the volatile scratch area; replay slots live below it.
pub const SCRATCH_BASE: u64 = 0x1_0000_0000;

/// Bytes per replay slot.
pub const SLOT_SIZE: u64 = 8;

const SCRATCH_ALIGNMENT: u64 = 16;

/// A handle a command created while it mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedHandle {
    pub kind: HandleKind,
    pub handle: Handle,
}

/// Position in a builder's output, taken before a command is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    instructions: usize,
    slots: usize,
}

/// Invoked once with the bytes a notification delivers.
pub type NotificationReader = Box<dyn FnOnce(&[u8]) + Send>;

/// Receives the commands that survive mutation, in order.
pub trait ReplayBuilder {
    /// Append `cmd`; `created` lists the handles its mutation registered.
    fn append(&mut self, id: CommandId, cmd: &Command, created: &[CreatedHandle]) -> Result<()>;

    /// Copy `size` bytes between two volatile addresses at replay time.
    fn copy(&mut self, dst: u64, src: u64, size: u64) -> Result<()>;

    /// Reserve `size` bytes of volatile scratch, returning its address.
    fn alloc_scratch(&mut self, size: u64) -> u64;

    /// Ask the replayer to send back `source` once it has executed this far.
    /// `reader` runs when the payload is delivered.
    fn notify(&mut self, source: NotifySource, reader: NotificationReader) -> u64;

    /// Every replay slot assigned so far, in assignment order.
    fn remapped(&self) -> Vec<HandleSlot>;

    fn checkpoint(&self) -> Checkpoint;

    /// Discard everything appended since `checkpoint`. Scratch is not reused.
    fn rollback(&mut self, checkpoint: Checkpoint);
}

// ── Notifications ───────────────────────────────────────────

/// Readers waiting for replay-side payloads, keyed by notification id.
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct NotificationRegistry {
    readers: Arc<DashMap<u64, NotificationReader>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reader: NotificationReader) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.readers.insert(id, reader);
        id
    }

    /// Hand `payload` to the reader registered under `id`.
    /// Returns false if no reader is waiting.
    pub fn deliver(&self, id: u64, payload: &[u8]) -> bool {
        match self.readers.remove(&id) {
            Some((_, reader)) => {
                debug!("delivering notification {} ({} bytes)", id, payload.len());
                reader(payload);
                true
            }
            None => {
                warn!("notification {} has no reader", id);
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.readers.len()
    }

    fn forget(&self, id: u64) {
        self.readers.remove(&id);
    }
}

// ── Instruction stream ──────────────────────────────────────

/// [`ReplayBuilder`] that records a linear instruction program.
#[derive(Default)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
    slots: Vec<HandleSlot>,
    /// Latest slot assigned to each trace handle.
    slot_of: HashMap<(HandleKind, Handle), u64>,
    next_slot: u64,
    next_scratch: u64,
    notifications: NotificationRegistry,
}

impl InstructionStream {
    pub fn new() -> Self {
        Self {
            next_scratch: SCRATCH_BASE,
            ..Default::default()
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Slot holding the replay value of `handle`, if a command created it.
    pub fn slot(&self, kind: HandleKind, handle: Handle) -> Option<u64> {
        self.slot_of.get(&(kind, handle)).copied()
    }

    /// Shared handle to the registry, for delivering payloads after replay.
    pub fn notifications(&self) -> NotificationRegistry {
        self.notifications.clone()
    }

    /// Bytes of the slot area assigned so far.
    pub fn slot_area_size(&self) -> u64 {
        self.next_slot
    }

    /// Write every instruction followed by the end marker.
    pub fn write_to<W: Write>(&self, mut writer: RecordWriter<W>) -> Result<W> {
        for instruction in &self.instructions {
            writer.write(&Record::Instruction(instruction.clone()))?;
        }
        debug!("wrote {} instructions", self.instructions.len());
        Ok(writer.finish()?)
    }
}

impl ReplayBuilder for InstructionStream {
    fn append(&mut self, id: CommandId, cmd: &Command, created: &[CreatedHandle]) -> Result<()> {
        let mut outputs = Vec::new();
        for c in created.iter().filter(|c| c.handle.is_remappable()) {
            let slot = HandleSlot { kind: c.kind, trace: c.handle, offset: self.next_slot };
            self.next_slot += SLOT_SIZE;
            self.slot_of.insert((c.kind, c.handle), slot.offset);
            self.slots.push(slot);
            outputs.push(slot);
        }
        trace!("append {} {} ({} outputs)", id, cmd.kind(), outputs.len());
        self.instructions.push(Instruction::Call { id, command: cmd.clone(), outputs });
        Ok(())
    }

    fn copy(&mut self, dst: u64, src: u64, size: u64) -> Result<()> {
        self.instructions.push(Instruction::Copy { dst, src, size });
        Ok(())
    }

    fn alloc_scratch(&mut self, size: u64) -> u64 {
        let address = align_up(self.next_scratch, SCRATCH_ALIGNMENT);
        self.next_scratch = address + size;
        address
    }

    fn notify(&mut self, source: NotifySource, reader: NotificationReader) -> u64 {
        let id = self.notifications.register(reader);
        self.instructions.push(Instruction::Notify { id, source });
        id
    }

    fn remapped(&self) -> Vec<HandleSlot> {
        self.slots.clone()
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint { instructions: self.instructions.len(), slots: self.slots.len() }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        for dropped in self.instructions.drain(checkpoint.instructions.min(self.instructions.len())..) {
            if let Instruction::Notify { id, .. } = dropped {
                self.notifications.forget(id);
            }
        }
        self.slots.truncate(checkpoint.slots);
        self.next_slot = self.slots.len() as u64 * SLOT_SIZE;
        self.slot_of = self.slots.iter().map(|s| ((s.kind, s.trace), s.offset)).collect();
        debug!("rolled back to {} instructions", self.instructions.len());
    }
}
