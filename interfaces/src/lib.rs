//! I/O Interfaces
//!
//! File-backed sample sources and sinks plus the DCI record sink. All
//! sample files are interleaved 32-bit little-endian I/Q floats.

pub mod dci_sink;
pub mod file_sink;
pub mod file_source;

pub use dci_sink::DciSink;
pub use file_sink::FileSink;
pub use file_source::FileSource;

use thiserror::Error;

/// Interface error types
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
