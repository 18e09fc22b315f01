use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::Arc;

use anyhow::{bail, Context};
use rtrace_core::config::RtraceConfig;
use rtrace_protocol::observation::ResourceId;
use rtrace_protocol::wire::{Record, RecordReader, RecordWriter};
use rtrace_replay::memory::ResourceStore;
use rtrace_replay::state::LoggingWatcher;
use rtrace_replay::{InstructionStream, Mutator, Pipeline, State, Writer};
use tracing::{debug, info, warn};

/// Issues printed individually before only the count is reported.
const MAX_LOGGED_ISSUES: usize = 32;

/// Outcome of one build.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub commands: u64,
    /// Commands whose mutation failed; nothing of them was emitted.
    pub skipped: u64,
    pub subcommands: u64,
    pub resources: usize,
    pub resource_bytes: u64,
    pub instructions: usize,
    pub issues: usize,
    pub passes: Vec<&'static str>,
    pub output: Option<String>,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "commands:     {} ({} recorded subcommands)", self.commands, self.subcommands)?;
        if self.skipped > 0 {
            writeln!(f, "skipped:      {}", self.skipped)?;
        }
        writeln!(f, "resources:    {} ({} bytes)", self.resources, self.resource_bytes)?;
        writeln!(f, "issues:       {}", self.issues)?;
        if self.passes.is_empty() {
            writeln!(f, "transforms:   none")?;
        } else {
            writeln!(f, "transforms:   {}", self.passes.join(", "))?;
        }
        match &self.output {
            Some(path) => write!(f, "instructions: {} written to {}", self.instructions, path),
            None => write!(f, "instructions: none (dry run)"),
        }
    }
}

/// Mutate every command of `capture` through the configured transforms.
/// With an `output` path the surviving commands are written as a replay
/// program; without one only the shadow state is tracked.
pub fn run(capture: &str, output: Option<&str>, config: &RtraceConfig) -> anyhow::Result<BuildSummary> {
    let file = File::open(capture).with_context(|| format!("opening capture {}", capture))?;
    let reader = RecordReader::new(BufReader::new(file));

    let store = Arc::new(ResourceStore::new());
    let mut state = State::new(config, Arc::clone(&store));
    let mut pipeline = Pipeline::from_config(&config.transforms)?;
    let mut stream = InstructionStream::new();
    let mut watcher = LoggingWatcher::default();
    let mut skipped = 0;

    {
        let mut m = Mutator::new(&mut state).with_watcher(&mut watcher);
        if output.is_some() {
            m = m.with_builder(&mut stream);
        }
        for record in reader {
            match record? {
                Record::Resource { id, data } => {
                    if ResourceId::of(&data) != id {
                        warn!("resource {} does not match its contents, storing under its recorded id", id);
                    }
                    store.insert(id, data);
                }
                Record::Command { id, command } => {
                    let checkpoint = m.builder().map(|b| b.checkpoint());
                    if let Err(e) = pipeline.run(id, &command, &mut m) {
                        warn!("{} {} skipped: {}", id, command.kind(), e);
                        if let (Some(checkpoint), Some(builder)) = (checkpoint, m.builder()) {
                            builder.rollback(checkpoint);
                        }
                        skipped += 1;
                    }
                }
                Record::Instruction(_) => bail!("{} is a replay program, not a capture", capture),
                Record::End => break,
            }
        }
        pipeline.flush(&mut m).context("flushing transforms")?;
    }

    for issue in state.issues.iter().take(MAX_LOGGED_ISSUES) {
        warn!("{}: {:?}", issue.command, issue.kind);
    }
    if state.issues.len() > MAX_LOGGED_ISSUES {
        warn!("{} more issues not shown", state.issues.len() - MAX_LOGGED_ISSUES);
    }
    debug!("{} transient allocations still live", state.allocator().live_count());

    let mut summary = BuildSummary {
        commands: watcher.commands,
        skipped,
        subcommands: watcher.subcommands,
        resources: store.len(),
        resource_bytes: store.total_bytes(),
        instructions: stream.len(),
        issues: state.issues.len(),
        passes: pipeline.names(),
        output: None,
    };

    if let Some(path) = output {
        let file = File::create(path).with_context(|| format!("creating {}", path))?;
        stream.write_to(RecordWriter::new(BufWriter::new(file)))?;
        info!("wrote {} instructions to {}", stream.len(), path);
        summary.output = Some(path.to_string());
    }
    Ok(summary)
}
