use std::io::Write;
use std::path::Path;

use dashmap::DashMap;
use rtrace_protocol::handle::{Handle, HandleKind};

use crate::error::CoreError;

/// One trace-time handle and the value the replay device gave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleMapping {
    pub kind: HandleKind,
    pub trace: Handle,
    pub replay: u64,
}

impl HandleMapping {
    /// `HandleType(traceValue): replayValue`, both values in decimal.
    pub fn line(&self) -> String {
        format!("{}({}): {}", self.kind.type_name(), self.trace.0, self.replay)
    }
}

/// Bidirectional mapping between trace-time handles and replay-time values.
/// Filled when the replay device reports the values it assigned.
#[derive(Default)]
pub struct HandleMappingTable {
    /// (kind, trace handle) -> replay value
    trace_to_replay: DashMap<(HandleKind, Handle), u64>,
    /// replay value -> every mapping that resolved to it
    replay_to_trace: DashMap<u64, Vec<HandleMapping>>,
}

impl HandleMappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping. A later insert for the same trace handle replaces it.
    pub fn insert(&self, kind: HandleKind, trace: Handle, replay: u64) {
        if let Some(old) = self.trace_to_replay.insert((kind, trace), replay) {
            if let Some(mut entries) = self.replay_to_trace.get_mut(&old) {
                entries.retain(|m| !(m.kind == kind && m.trace == trace));
            }
        }
        self.replay_to_trace
            .entry(replay)
            .or_default()
            .push(HandleMapping { kind, trace, replay });
    }

    pub fn to_replay(&self, kind: HandleKind, trace: Handle) -> Option<u64> {
        self.trace_to_replay.get(&(kind, trace)).map(|v| *v)
    }

    pub fn to_trace(&self, replay: u64) -> Vec<HandleMapping> {
        self.replay_to_trace
            .get(&replay)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.trace_to_replay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_to_replay.is_empty()
    }

    /// Every entry as an export line, sorted lexicographically.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .trace_to_replay
            .iter()
            .map(|e| {
                let (kind, trace) = *e.key();
                HandleMapping { kind, trace, replay: *e.value() }.line()
            })
            .collect();
        lines.sort();
        lines
    }

    /// Write the sorted export lines to `path`, one per line.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path.as_ref())?);
        for line in self.lines() {
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        Ok(())
    }
}
