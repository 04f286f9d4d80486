//! DCI Record Sink
//!
//! Emits confirmed detections as JSON lines, one record per line, to a
//! file or to standard output. Records are flushed immediately so that a
//! consumer tailing the file sees detections as they happen.

use crate::InterfaceError;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// JSON-lines writer for any serializable detection record
pub struct DciSink {
    writer: Box<dyn Write + Send>,
    records_written: u64,
}

impl DciSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, InterfaceError> {
        let file = File::create(path.as_ref())?;
        debug!("opened DCI sink {}", path.as_ref().display());
        Ok(Self {
            writer: Box::new(BufWriter::new(file)),
            records_written: 0,
        })
    }

    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<(), InterfaceError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }
}
