//! Destination of the shell-command trace.
//!
//! The trace carries nothing but command lines, one per mutation, so that
//! `todo` output can be piped into a shell. Diagnostics go through `tracing`.

use crate::error::{DrsError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub enum TraceSink {
    #[default]
    Stdout,
    File(Arc<Mutex<BufWriter<File>>>),
    Memory(Arc<Mutex<Vec<String>>>),
}

fn poisoned() -> DrsError {
    DrsError::Other("trace sink lock poisoned".to_string())
}

impl TraceSink {
    /// Write into a commands file; an existing file is kept unless `overwrite`.
    pub fn to_file(path: &Path, overwrite: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                DrsError::Config {
                    message: format!(
                        "{} already exists, use --overwrite-commands-file to replace it",
                        path.display()
                    ),
                }
            } else {
                DrsError::io_with_path(e, path)
            }
        })?;
        Ok(TraceSink::File(Arc::new(Mutex::new(BufWriter::new(file)))))
    }

    /// Collect lines in memory.
    pub fn memory() -> Self {
        TraceSink::Memory(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn emit(&self, line: &str) -> Result<()> {
        match self {
            TraceSink::Stdout => {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{}", line)?;
            }
            TraceSink::File(writer) => {
                let mut writer = writer.lock().map_err(|_| poisoned())?;
                writeln!(writer, "{}", line)?;
            }
            TraceSink::Memory(lines) => {
                lines.lock().map_err(|_| poisoned())?.push(line.to_string());
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        match self {
            TraceSink::Stdout => std::io::stdout().flush()?,
            TraceSink::File(writer) => writer.lock().map_err(|_| poisoned())?.flush()?,
            TraceSink::Memory(_) => {}
        }
        Ok(())
    }

    /// Lines captured so far; empty unless the sink is in memory.
    pub fn lines(&self) -> Vec<String> {
        match self {
            TraceSink::Memory(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}
