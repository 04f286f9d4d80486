//! OFDM Symbol Container
//!
//! One post-FFT OFDM symbol's resource elements together with its derived
//! channel estimate, equalized copy and noise estimate.

use crate::LayerError;
use num_complex::Complex32;

/// Frequency-domain resource elements of a single OFDM symbol
#[derive(Debug, Clone, Default)]
pub struct Symbol {
    /// Index of the first time-domain sample this symbol was produced from
    pub sample_index: u64,
    /// Raw resource elements
    pub samples: Vec<Complex32>,
    /// Equalized resource elements, valid once equalized
    pub samples_eq: Vec<Complex32>,
    /// Per-subcarrier channel estimate
    pub channel_filter: Vec<Complex32>,
    /// Per-subcarrier deviation from the average channel estimate
    pub noise: Vec<Complex32>,
    /// OFDM symbol index within the slot
    pub symbol_index: usize,
    /// Slot index within the frame
    pub slot_index: usize,
    /// Reference-signal key the current equalization was computed for
    equalized_key: Option<u64>,
}

impl Symbol {
    pub fn new(samples: Vec<Complex32>, symbol_index: usize, slot_index: usize, sample_index: u64) -> Self {
        Self {
            sample_index,
            samples,
            symbol_index,
            slot_index,
            ..Default::default()
        }
    }

    /// Whether the equalization step has run
    pub fn is_equalized(&self) -> bool {
        self.equalized_key.is_some()
    }

    /// Resource elements in `start..=end`; the equalized copy when available
    pub fn resource_elements(&self, start: usize, end: usize) -> &[Complex32] {
        if self.is_equalized() {
            &self.samples_eq[start..=end]
        } else {
            &self.samples[start..=end]
        }
    }

    /// Estimate the channel from reference signals at the given subcarrier
    /// indices and equalize the whole symbol. Channel values between
    /// reference points are linearly interpolated. Idempotent per key: a
    /// repeated call with the key of the current estimate is a no-op.
    pub fn channel_estimate(
        &mut self,
        key: u64,
        reference: &[Complex32],
        indices: &[usize],
    ) -> Result<(), LayerError> {
        if self.equalized_key == Some(key) {
            return Ok(());
        }
        if reference.len() < indices.len() {
            return Err(LayerError::ProcessingError(format!(
                "{} reference symbols for {} reference indices",
                reference.len(),
                indices.len()
            )));
        }

        self.channel_filter = vec![Complex32::new(1.0, 0.0); self.samples.len()];
        self.noise = vec![Complex32::new(0.0, 0.0); self.samples.len()];
        self.samples_eq = vec![Complex32::new(0.0, 0.0); self.samples.len()];

        let mut prev: Option<usize> = None;
        for (ref_index, &re_index) in indices.iter().enumerate() {
            if re_index >= self.samples.len() {
                return Err(LayerError::ProcessingError(format!(
                    "reference index {} outside symbol of {} subcarriers",
                    re_index,
                    self.samples.len()
                )));
            }

            self.channel_filter[re_index] = self.samples[re_index] * reference[ref_index].conj();

            // Interpolate between the previous reference point and this one
            if let Some(prev_index) = prev {
                let distance = re_index - prev_index;
                if distance > 1 {
                    let step = (self.channel_filter[re_index] - self.channel_filter[prev_index])
                        / distance as f32;
                    for j in (prev_index + 1)..re_index {
                        self.channel_filter[j] = self.channel_filter[j - 1] + step;
                    }
                }
            }
            prev = Some(re_index);
        }

        let average_channel = self.average_channel();
        let squared_magnitude = self.average_channel_magnitude().powi(2);

        for i in 0..self.samples.len() {
            self.samples_eq[i] = (self.samples[i] * self.channel_filter[i].conj()) / squared_magnitude;
            self.noise[i] = self.channel_filter[i] - average_channel;
        }

        self.equalized_key = Some(key);
        Ok(())
    }

    /// Average magnitude of the noise estimate over the symbol
    pub fn average_noise_magnitude(&self) -> f32 {
        average_magnitude(&self.noise)
    }

    /// Average magnitude of the channel estimate over the symbol
    pub fn average_channel_magnitude(&self) -> f32 {
        average_magnitude(&self.channel_filter)
    }

    /// Average of the channel estimate as a complex value
    pub fn average_channel(&self) -> Complex32 {
        if self.channel_filter.is_empty() {
            return Complex32::new(0.0, 0.0);
        }
        let total: Complex32 = self.channel_filter.iter().sum();
        total / self.channel_filter.len() as f32
    }

    /// Average magnitude of the raw resource elements
    pub fn average_magnitude(&self) -> f32 {
        average_magnitude(&self.samples)
    }

    /// Relative channel-quality ranking score in dB. Not calibrated against
    /// noise power; only meaningful for comparing hypotheses on one symbol.
    pub fn channel_ranking_db(&self) -> f32 {
        10.0 * self.average_channel_magnitude().log10()
    }
}

fn average_magnitude(values: &[Complex32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v.norm()).sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_channel_symbol() -> (Symbol, Vec<Complex32>, Vec<usize>) {
        // Known references on a perfectly flat unit channel
        let reference: Vec<Complex32> = (0..4)
            .map(|i| Complex32::new((i as f32).cos(), (i as f32).sin()))
            .collect();
        let indices = vec![1, 5, 9, 11];

        let mut samples = vec![Complex32::new(0.5, 0.5); 12];
        for (r, &idx) in reference.iter().zip(indices.iter()) {
            samples[idx] = *r;
        }

        (Symbol::new(samples, 0, 0, 0), reference, indices)
    }

    #[test]
    fn test_flat_channel_equalization() {
        let (mut symbol, reference, indices) = flat_channel_symbol();
        symbol.channel_estimate(0, &reference, &indices).unwrap();

        assert!(symbol.is_equalized());
        // Unit channel: references equalize back to near themselves
        for (r, &idx) in reference.iter().zip(indices.iter()) {
            assert!((symbol.samples_eq[idx] - r).norm() < 1e-3);
        }
        assert!(symbol.average_noise_magnitude() < 1e-3);
    }

    #[test]
    fn test_equalization_idempotent_per_key() {
        let (mut symbol, reference, indices) = flat_channel_symbol();
        symbol.channel_estimate(7, &reference, &indices).unwrap();
        let first = symbol.samples_eq.clone();

        symbol.channel_estimate(7, &reference, &indices).unwrap();
        assert_eq!(first, symbol.samples_eq);
    }

    #[test]
    fn test_out_of_range_reference_index_fails() {
        let (mut symbol, reference, _) = flat_channel_symbol();
        let result = symbol.channel_estimate(0, &reference, &[1, 5, 9, 100]);
        assert!(result.is_err());
    }

    #[test]
    fn test_resource_elements_prefer_equalized() {
        let (mut symbol, reference, indices) = flat_channel_symbol();
        // Scale the received symbol so the channel gain is 2.0
        for s in symbol.samples.iter_mut() {
            *s *= 2.0;
        }
        let raw = symbol.resource_elements(0, 11).to_vec();
        symbol.channel_estimate(0, &reference, &indices).unwrap();
        let eq = symbol.resource_elements(0, 11).to_vec();
        assert_eq!(raw.len(), eq.len());
        assert_ne!(raw, eq);
    }
}
