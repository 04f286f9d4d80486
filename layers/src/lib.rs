//! Signal Processing Layers Library
//!
//! This crate implements the receiver-side physical layer of the sniffer:
//! cell synchronization, OFDM demodulation and blind PDCCH decoding.

pub mod phy;

use thiserror::Error;

/// Common errors for the processing layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
