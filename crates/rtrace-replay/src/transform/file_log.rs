use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rtrace_protocol::command::{Command, CommandId};
use tracing::debug;

use super::{Transform, Writer};
use crate::error::Result;

/// Logs every command passing through it, one line each, then forwards it.
pub struct FileLog {
    file: BufWriter<File>,
    lines: u64,
}

impl FileLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!("logging commands to {}", path.as_ref().display());
        Ok(Self { file: BufWriter::new(file), lines: 0 })
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }
}

impl Transform for FileLog {
    fn name(&self) -> &'static str {
        "file_log"
    }

    fn transform(&mut self, id: CommandId, cmd: &Command, out: &mut dyn Writer) -> Result<()> {
        writeln!(self.file, "{} {} thread={} {:?}", id, cmd.kind(), cmd.thread, cmd.args)?;
        self.lines += 1;
        out.write(id, cmd)
    }

    fn flush(&mut self, _out: &mut dyn Writer) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}
