use std::path::PathBuf;
use std::sync::Arc;

use rtrace_core::handle_map::HandleMappingTable;
use rtrace_protocol::command::{Command, CommandId};
use rtrace_protocol::instruction::NotifySource;
use tracing::{error, info, warn};

use super::{Transform, Writer};
use crate::error::Result;
use crate::replay_builder::SLOT_SIZE;

/// Exports the trace-to-replay handle mapping once replay has run.
///
/// At flush the replayer is asked for the whole slot area; when it answers,
/// each slot's replay value is paired with the trace handle it was assigned
/// to and the table is written to `path`.
pub struct HandleMappingExporter {
    path: PathBuf,
    table: Arc<HandleMappingTable>,
}

impl HandleMappingExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), table: Arc::new(HandleMappingTable::new()) }
    }

    /// Filled in when the replayer delivers the slot area.
    pub fn table(&self) -> Arc<HandleMappingTable> {
        Arc::clone(&self.table)
    }
}

impl Transform for HandleMappingExporter {
    fn name(&self) -> &'static str {
        "handle_mapping"
    }

    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        out.write(id, cmd)
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<()> {
        let Some(builder) = out.builder() else {
            warn!("no replay builder, handle mapping not exported");
            return Ok(());
        };
        let slots = builder.remapped();
        let size = slots.iter().map(|s| s.offset + SLOT_SIZE).max().unwrap_or(0);
        let table = Arc::clone(&self.table);
        let path = self.path.clone();
        builder.notify(
            NotifySource::Scratch { address: 0, size },
            Box::new(move |bytes: &[u8]| {
                for slot in &slots {
                    let start = slot.offset as usize;
                    let Some(raw) = bytes.get(start..start + SLOT_SIZE as usize) else {
                        warn!("slot {} for {} {} outside delivered area", slot.offset, slot.kind, slot.trace);
                        continue;
                    };
                    let mut value = [0u8; SLOT_SIZE as usize];
                    value.copy_from_slice(raw);
                    table.insert(slot.kind, slot.trace, u64::from_le_bytes(value));
                }
                match table.write_to(&path) {
                    Ok(()) => info!("wrote {} handle mappings to {}", table.len(), path.display()),
                    Err(e) => error!("failed to write handle mapping to {}: {}", path.display(), e),
                }
            }),
        );
        Ok(())
    }
}
