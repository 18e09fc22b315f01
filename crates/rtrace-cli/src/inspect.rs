use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;

use anyhow::Context;
use rtrace_protocol::command::CommandKind;
use rtrace_protocol::observation::ResourceId;
use rtrace_protocol::wire::{Record, RecordReader};

/// Contents of a capture or replay program, counted by record type.
#[derive(Debug, Default)]
pub struct Report {
    pub commands: u64,
    pub per_kind: BTreeMap<CommandKind, u64>,
    pub resources: usize,
    pub resource_bytes: u64,
    pub reads: u64,
    pub writes: u64,
    /// Observations naming a resource not stored earlier in the file.
    pub dangling: u64,
    pub instructions: u64,
}

impl Report {
    /// Command kinds by descending count, ties by name.
    pub fn top_kinds(&self, n: usize) -> Vec<(CommandKind, u64)> {
        let mut kinds: Vec<_> = self.per_kind.iter().map(|(k, c)| (*k, *c)).collect();
        kinds.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
        kinds.truncate(n);
        kinds
    }

    pub fn print(&self, top: usize) {
        println!("Commands:      {}", self.commands);
        println!("Instructions:  {}", self.instructions);
        println!("Resources:     {} ({} bytes)", self.resources, self.resource_bytes);
        println!("Observations:  {} reads, {} writes", self.reads, self.writes);
        if self.dangling > 0 {
            println!("Dangling:      {}", self.dangling);
        }
        if self.per_kind.is_empty() {
            return;
        }
        println!();
        for (kind, count) in self.top_kinds(top) {
            println!("  {:>8}  {}", count, kind);
        }
        if self.per_kind.len() > top {
            println!("  ... {} more kinds", self.per_kind.len() - top);
        }
    }
}

pub fn run(path: &str) -> anyhow::Result<Report> {
    let file = File::open(path).with_context(|| format!("opening {}", path))?;
    let mut report = Report::default();
    let mut stored: HashSet<ResourceId> = HashSet::new();

    for record in RecordReader::new(BufReader::new(file)) {
        match record? {
            Record::Resource { id, data } => {
                if stored.insert(id) {
                    report.resources += 1;
                    report.resource_bytes += data.len() as u64;
                }
            }
            Record::Command { command, .. } => {
                report.commands += 1;
                *report.per_kind.entry(command.kind()).or_default() += 1;
                let observations = command.observations();
                report.reads += observations.reads.len() as u64;
                report.writes += observations.writes.len() as u64;
                report.dangling += observations
                    .reads
                    .iter()
                    .chain(&observations.writes)
                    .filter(|o| !stored.contains(&o.id))
                    .count() as u64;
            }
            Record::Instruction(_) => report.instructions += 1,
            Record::End => break,
        }
    }
    Ok(report)
}
