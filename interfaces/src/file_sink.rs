//! Baseband File Sink
//!
//! Writes synchronized sample streams back to disk in the same
//! interleaved f32 I/Q layout the source reads.

use crate::InterfaceError;
use num_complex::Complex32;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Streaming writer of interleaved 32-bit float I/Q samples
pub struct FileSink {
    writer: BufWriter<File>,
    samples_written: u64,
}

impl FileSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, InterfaceError> {
        let file = File::create(path.as_ref())?;
        debug!("opened sample sink {}", path.as_ref().display());
        Ok(Self {
            writer: BufWriter::new(file),
            samples_written: 0,
        })
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn write(&mut self, samples: &[Complex32]) -> Result<(), InterfaceError> {
        for sample in samples {
            self.writer.write_all(&sample.re.to_le_bytes())?;
            self.writer.write_all(&sample.im.to_le_bytes())?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), InterfaceError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileSource;

    #[test]
    fn test_sink_output_is_source_readable() {
        let path = std::env::temp_dir().join(format!("nr_sniffer_{}_sink.fc32", std::process::id()));
        let samples: Vec<Complex32> = (0..6)
            .map(|i| Complex32::new(0.5 * i as f32, 1.0 - i as f32))
            .collect();

        let mut sink = FileSink::create(&path).unwrap();
        sink.write(&samples[..3]).unwrap();
        sink.write(&samples[3..]).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.samples_written(), 6);
        drop(sink);

        let mut source = FileSource::open(&path, 16).unwrap();
        assert_eq!(source.read_chunk().unwrap(), Some(samples));
        std::fs::remove_file(path).unwrap();
    }
}
