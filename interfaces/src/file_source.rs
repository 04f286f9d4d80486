//! Baseband File Source
//!
//! Chunked reader for recorded I/Q captures. The end of the file is the
//! clean end of the stream, not an error.

use crate::InterfaceError;
use num_complex::Complex32;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Bytes per complex sample (two little-endian f32)
const BYTES_PER_SAMPLE: usize = 8;

/// Streaming reader of interleaved 32-bit float I/Q samples
pub struct FileSource {
    reader: BufReader<File>,
    chunk_samples: usize,
    samples_read: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P, chunk_samples: usize) -> Result<Self, InterfaceError> {
        if chunk_samples == 0 {
            return Err(InterfaceError::InvalidData(
                "chunk size must be at least one sample".into(),
            ));
        }
        let file = File::open(path.as_ref())?;
        debug!(
            "opened sample source {} (chunk {} samples)",
            path.as_ref().display(),
            chunk_samples
        );
        Ok(Self {
            reader: BufReader::new(file),
            chunk_samples,
            samples_read: 0,
        })
    }

    /// Total samples handed out so far
    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    /// Read up to one chunk. Returns None at the end of the stream; a
    /// trailing partial sample is discarded.
    pub fn read_chunk(&mut self) -> Result<Option<Vec<Complex32>>, InterfaceError> {
        let mut bytes = vec![0u8; self.chunk_samples * BYTES_PER_SAMPLE];
        let mut filled = 0;
        while filled < bytes.len() {
            let n = self.reader.read(&mut bytes[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let complete = filled / BYTES_PER_SAMPLE;
        if complete == 0 {
            return Ok(None);
        }

        let samples: Vec<Complex32> = bytes[..complete * BYTES_PER_SAMPLE]
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|chunk| {
                let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                Complex32::new(re, im)
            })
            .collect();

        self.samples_read += samples.len() as u64;
        Ok(Some(samples))
    }
}
