//! Synchronization Signal Sequences and Detectors
//!
//! PSS/SSS m-sequence generation per 3GPP TS 38.211 Sections 7.4.2.2/7.4.2.3,
//! their time-domain replicas for correlation, and the detectors used by the
//! cell-search state machine.

use crate::phy::dsp;
use crate::LayerError;
use common::types::Pci;
use num_complex::Complex32;
use rustfft::FftPlanner;
use tracing::{debug, trace};

/// Length of the PSS and SSS sequences in subcarriers
pub const PSS_LENGTH: usize = 127;
/// Number of NID1 hypotheses
pub const NUM_NID1: u16 = 336;
/// Number of NID2 hypotheses
pub const NUM_NID2: u8 = 3;
/// Subcarriers spanned by the SSB grid
pub const SSB_NUM_SUBCARRIERS: usize = 240;
/// First subcarrier of the PSS and SSS within the SSB grid
pub const SYNC_FIRST_SUBCARRIER: usize = 56;

/// Generate the frequency-domain PSS for one NID2 as BPSK values
pub fn generate_pss_sequence(nid2: u8) -> Vec<Complex32> {
    // x(i+7) = (x(i+4) + x(i)) mod 2, [x(6)..x(0)] = [1 1 1 0 1 1 0]
    let mut x = [0u8; PSS_LENGTH];
    x[..7].copy_from_slice(&[0, 1, 1, 0, 1, 1, 1]);
    for i in 0..PSS_LENGTH - 7 {
        x[i + 7] = (x[i + 4] + x[i]) % 2;
    }

    (0..PSS_LENGTH)
        .map(|n| {
            let m = (n + 43 * nid2 as usize) % PSS_LENGTH;
            Complex32::new(1.0 - 2.0 * x[m] as f32, 0.0)
        })
        .collect()
}

/// Generate the frequency-domain SSS for one (NID1, NID2) pair as BPSK values
pub fn generate_sss_sequence(nid1: u16, nid2: u8) -> Vec<Complex32> {
    // x0(i+7) = x0(i+4) + x0(i), x1(i+7) = x1(i+1) + x1(i),
    // both initialized to [x(6)..x(0)] = [0 0 0 0 0 0 1]
    let mut x0 = [0u8; PSS_LENGTH];
    let mut x1 = [0u8; PSS_LENGTH];
    x0[0] = 1;
    x1[0] = 1;
    for i in 0..PSS_LENGTH - 7 {
        x0[i + 7] = (x0[i + 4] + x0[i]) % 2;
        x1[i + 7] = (x1[i + 1] + x1[i]) % 2;
    }

    let m0 = 15 * (nid1 as usize / 112) + 5 * nid2 as usize;
    let m1 = nid1 as usize % 112;

    (0..PSS_LENGTH)
        .map(|n| {
            let a = 1.0 - 2.0 * x0[(n + m0) % PSS_LENGTH] as f32;
            let b = 1.0 - 2.0 * x1[(n + m1) % PSS_LENGTH] as f32;
            Complex32::new(a * b, 0.0)
        })
        .collect()
}

/// Convert a PSS or SSS sequence into its time-domain replica at the given
/// FFT size, placed at its SSB grid position (grid center on DC)
pub fn time_domain_replica(sequence: &[Complex32], fft_size: usize) -> Vec<Complex32> {
    let grid_center = SSB_NUM_SUBCARRIERS as isize / 2;
    let mut frequency = vec![Complex32::new(0.0, 0.0); fft_size];
    for (n, value) in sequence.iter().enumerate() {
        let k = (SYNC_FIRST_SUBCARRIER + n) as isize - grid_center;
        let bin = k.rem_euclid(fft_size as isize) as usize;
        frequency[bin] = *value;
    }

    let ifft = FftPlanner::new().plan_fft_inverse(fft_size);
    ifft.process(&mut frequency);
    let scale = 1.0 / fft_size as f32;
    for value in frequency.iter_mut() {
        *value *= scale;
    }
    frequency
}

/// Outcome of a PSS search over one buffer
#[derive(Debug, Clone, Copy)]
pub struct PssDetection {
    pub nid2: u8,
    /// Sample offset of the correlation peak within the searched buffer
    pub position: usize,
    pub magnitude: f32,
}

/// Time-domain PSS correlator over the three NID2 hypotheses
pub struct PssCorrelator {
    replicas: Vec<Vec<Complex32>>,
    /// Peak must exceed this factor times the average correlation magnitude
    threshold_factor: f32,
}

impl PssCorrelator {
    pub fn new(fft_size: usize, threshold_factor: f32) -> Self {
        let replicas = (0..NUM_NID2)
            .map(|nid2| time_domain_replica(&generate_pss_sequence(nid2), fft_size))
            .collect();
        Self {
            replicas,
            threshold_factor,
        }
    }

    /// Length of one time-domain PSS replica
    pub fn replica_length(&self) -> usize {
        self.replicas[0].len()
    }

    /// Search the buffer for the strongest PSS. When `pinned_nid2` is set,
    /// only that hypothesis is correlated.
    pub fn find(&self, samples: &[Complex32], pinned_nid2: Option<u8>) -> Option<PssDetection> {
        let mut best: Option<PssDetection> = None;

        for (nid2, replica) in self.replicas.iter().enumerate() {
            if let Some(pinned) = pinned_nid2 {
                if pinned as usize != nid2 {
                    continue;
                }
            }

            let magnitudes = dsp::correlate_magnitude(samples, replica);
            if magnitudes.is_empty() {
                continue;
            }
            let average = magnitudes.iter().sum::<f32>() / magnitudes.len() as f32;
            let (position, &magnitude) = magnitudes
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))?;

            trace!(
                "PSS nid2={} peak {:.3} at {} (avg {:.3})",
                nid2,
                magnitude,
                position,
                average
            );

            if magnitude > self.threshold_factor * average
                && best.map_or(true, |b| magnitude > b.magnitude)
            {
                best = Some(PssDetection {
                    nid2: nid2 as u8,
                    position,
                    magnitude,
                });
            }
        }

        best
    }
}

/// Frequency-domain SSS detector holding all 336 NID1 hypotheses per NID2
pub struct SssDetector {
    /// sequences[nid2][nid1]
    sequences: Vec<Vec<Vec<Complex32>>>,
    threshold_factor: f32,
}

impl SssDetector {
    pub fn new(threshold_factor: f32) -> Self {
        let sequences = (0..NUM_NID2)
            .map(|nid2| {
                (0..NUM_NID1)
                    .map(|nid1| generate_sss_sequence(nid1, nid2))
                    .collect()
            })
            .collect();
        Self {
            sequences,
            threshold_factor,
        }
    }

    /// Correlate the 127 SSS resource elements against every NID1 hypothesis
    /// for the already-known NID2. The best hypothesis is accepted when it
    /// exceeds the threshold factor times the average over all hypotheses.
    pub fn detect(&self, sss_res: &[Complex32], nid2: u8) -> Result<Option<Pci>, LayerError> {
        if sss_res.len() != PSS_LENGTH {
            return Err(LayerError::ProcessingError(format!(
                "SSS detection needs {} resource elements, got {}",
                PSS_LENGTH,
                sss_res.len()
            )));
        }
        if nid2 >= NUM_NID2 {
            return Err(LayerError::ProcessingError(format!(
                "NID2 {} out of range",
                nid2
            )));
        }

        let mut total = 0.0f32;
        let mut best_nid1 = 0u16;
        let mut best = 0.0f32;

        for (nid1, sequence) in self.sequences[nid2 as usize].iter().enumerate() {
            let magnitude = dsp::correlate_normalized(sss_res, sequence);
            total += magnitude;
            if magnitude > best {
                best = magnitude;
                best_nid1 = nid1 as u16;
            }
        }

        let average = total / NUM_NID1 as f32;
        debug!(
            "SSS best nid1={} corr {:.3} (avg {:.3})",
            best_nid1, best, average
        );

        if best > self.threshold_factor * average {
            Ok(Pci::from_nids(best_nid1, nid2))
        } else {
            Ok(None)
        }
    }
}
