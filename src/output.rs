//! Link log writer.
//!
//! The log is opened once per run in create+append mode and receives one
//! UTF-8 line per record.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::debug;

use crate::Result;

pub const DEFAULT_OUTPUT_FILE: &str = "msggrab.log";

pub struct LinkSink<W: Write> {
    writer: BufWriter<W>,
    path: Option<PathBuf>,
    lines_written: usize,
}

impl LinkSink<File> {
    /// Open `path` for appending, creating it if needed. Existing content is kept.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut sink = Self::new(file);
        sink.path = Some(path.to_path_buf());
        Ok(sink)
    }
}

impl<W: Write> LinkSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            path: None,
            lines_written: 0,
        }
    }

    /// Like [`LinkSink::new`] with a write buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize, writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, writer),
            path: None,
            lines_written: 0,
        }
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.lines_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::Error::Io(e.into_error()))
    }
}

/// Write every line from `lines` to `sink` in arrival order until the
/// producer closes the channel, then flush. Returns the number of lines written.
pub async fn drain<W: Write>(
    lines: &mut mpsc::Receiver<String>,
    sink: &mut LinkSink<W>,
) -> Result<usize> {
    let mut written = 0;
    while let Some(line) = lines.recv().await {
        sink.write_line(&line)?;
        written += 1;
    }
    sink.flush()?;
    debug!(lines = written, "Drained line stream");
    Ok(written)
}
