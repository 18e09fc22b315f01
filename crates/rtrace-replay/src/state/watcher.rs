use rtrace_protocol::command::{CommandId, CommandKind};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::observation::Range;
use tracing::trace;

use super::objects::SubcommandIndex;

/// Observer of state mutation, notified as commands and subcommands run.
pub trait StateWatcher {
    fn on_begin_command(&mut self, _id: CommandId, _kind: CommandKind) {}
    fn on_end_command(&mut self, _id: CommandId, _kind: CommandKind) {}
    /// Observation bytes copied into the application pool.
    fn on_memory_read(&mut self, _id: CommandId, _range: Range) {}
    fn on_memory_write(&mut self, _id: CommandId, _range: Range) {}
    fn on_subcommand(&mut self, _id: CommandId, _command_buffer: Handle, _index: SubcommandIndex) {}
}

/// Traces every notification.
#[derive(Debug, Default)]
pub struct LoggingWatcher {
    pub commands: u64,
    pub subcommands: u64,
}

impl StateWatcher for LoggingWatcher {
    fn on_begin_command(&mut self, id: CommandId, kind: CommandKind) {
        self.commands += 1;
        trace!("begin {} {}", id, kind);
    }

    fn on_end_command(&mut self, id: CommandId, kind: CommandKind) {
        trace!("end {} {}", id, kind);
    }

    fn on_memory_read(&mut self, id: CommandId, range: Range) {
        trace!("{} read {}", id, range);
    }

    fn on_memory_write(&mut self, id: CommandId, range: Range) {
        trace!("{} write {}", id, range);
    }

    fn on_subcommand(&mut self, id: CommandId, command_buffer: Handle, index: SubcommandIndex) {
        self.subcommands += 1;
        trace!("{} subcommand {:?} of {}", id, index, command_buffer);
    }
}
