//! Bandwidth Part Timing Geometry
//!
//! Derives the per-numerology OFDM timing grid (FFT size, cyclic prefix
//! lengths, symbol durations) for a given sample rate per 3GPP TS 38.211
//! Section 5.3.1.

use crate::LayerError;

/// Maximum supported numerology (subcarrier spacing 15 kHz * 2^mu)
pub const MAX_NUMEROLOGY: u8 = 5;

/// Immutable timing geometry of one bandwidth part
#[derive(Debug, Clone)]
pub struct BandwidthPart {
    /// Sample rate in Hz
    pub sample_rate: u64,
    /// Numerology index mu
    pub numerology: u8,
    /// Number of physical resource blocks
    pub num_prbs: u16,
    /// Extended cyclic prefix flag
    pub extended_cp: bool,
    /// Subcarrier spacing in Hz
    pub scs: u32,
    /// FFT size implied by sample rate and subcarrier spacing
    pub fft_size: usize,
    /// Number of occupied subcarriers (12 per PRB)
    pub num_subcarriers: usize,
    /// OFDM symbols per slot (14 normal CP, 12 extended)
    pub symbols_per_slot: usize,
    /// Slots per 1 ms subframe
    pub slots_per_subframe: usize,
    /// OFDM symbols per subframe
    pub symbols_per_subframe: usize,
    /// Slots per 10 ms frame
    pub slots_per_frame: usize,
    /// Duration of each symbol in the subframe, in seconds
    pub seconds_per_symbol: Vec<f64>,
}

impl BandwidthPart {
    pub fn new(
        sample_rate: u64,
        numerology: u8,
        num_prbs: u16,
        extended_cp: bool,
    ) -> Result<Self, LayerError> {
        if numerology > MAX_NUMEROLOGY {
            return Err(LayerError::InvalidConfiguration(format!(
                "numerology {} exceeds maximum {}",
                numerology, MAX_NUMEROLOGY
            )));
        }

        let scs = 15_000u32 << numerology;
        if sample_rate % scs as u64 != 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "sample rate {} is not a multiple of subcarrier spacing {}",
                sample_rate, scs
            )));
        }

        let fft_size = (sample_rate / scs as u64) as usize;
        let num_subcarriers = 12 * num_prbs as usize;
        if fft_size < num_subcarriers {
            return Err(LayerError::InvalidConfiguration(format!(
                "FFT size {} smaller than {} occupied subcarriers",
                fft_size, num_subcarriers
            )));
        }

        let symbols_per_slot = if extended_cp { 12 } else { 14 };
        let slots_per_subframe = 1usize << numerology;
        let symbols_per_subframe = symbols_per_slot * slots_per_subframe;
        let slots_per_frame = 10 * slots_per_subframe;

        let mut bwp = Self {
            sample_rate,
            numerology,
            num_prbs,
            extended_cp,
            scs,
            fft_size,
            num_subcarriers,
            symbols_per_slot,
            slots_per_subframe,
            symbols_per_subframe,
            slots_per_frame,
            seconds_per_symbol: Vec::new(),
        };

        bwp.seconds_per_symbol = (0..symbols_per_subframe)
            .map(|l| bwp.samples_per_symbol(l) as f64 / sample_rate as f64)
            .collect();

        Ok(bwp)
    }

    /// Cyclic prefix length in samples for the given symbol index within a
    /// subframe. With normal CP, symbols 0 and 7*2^mu carry the longer prefix
    /// that aligns the grid to the 0.5 ms half-subframe boundaries.
    pub fn samples_per_cp(&self, symbol_index: usize) -> usize {
        let symbol_index = symbol_index % self.symbols_per_subframe;

        if self.extended_cp {
            return (512 * self.fft_size) >> 11;
        }

        let base = (144 * self.fft_size) >> 11;
        let long_positions = [0, 7 << self.numerology];
        if long_positions.contains(&symbol_index) {
            base + ((16 * self.fft_size) << self.numerology >> 11)
        } else {
            base
        }
    }

    /// Total symbol length (cyclic prefix plus useful part) in samples
    pub fn samples_per_symbol(&self, symbol_index: usize) -> usize {
        self.fft_size + self.samples_per_cp(symbol_index)
    }

    /// Number of samples in one slot starting at the given subframe symbol
    pub fn samples_per_slot(&self, first_symbol_index: usize) -> usize {
        (0..self.symbols_per_slot)
            .map(|l| self.samples_per_symbol(first_symbol_index + l))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_lengths_numerology_zero() {
        let bwp = BandwidthPart::new(3_840_000, 0, 20, false).unwrap();

        assert_eq!(bwp.fft_size, 256);
        assert_eq!(bwp.samples_per_cp(0), 20);
        assert_eq!(bwp.samples_per_cp(1), 18);
        assert_eq!(bwp.samples_per_cp(7), 20);

        assert!((bwp.seconds_per_symbol[0] - 0.000071875).abs() < 1e-12);
        assert!((bwp.seconds_per_symbol[1] - 0.000071354167).abs() < 1e-9);
    }

    #[test]
    fn test_symbol_lengths_numerology_two() {
        let bwp = BandwidthPart::new(15_360_000, 2, 20, false).unwrap();

        assert_eq!(bwp.symbols_per_subframe, 56);
        assert!((bwp.seconds_per_symbol[0] - 0.000018359375).abs() < 1e-12);
        assert!((bwp.seconds_per_symbol[28] - 0.000018359375).abs() < 1e-12);
        assert!((bwp.seconds_per_symbol[29] - 0.000017838542).abs() < 1e-9);
    }

    #[test]
    fn test_two_long_prefixes_per_subframe() {
        for numerology in 0..=2u8 {
            let sample_rate = 3_840_000u64 << numerology;
            let bwp = BandwidthPart::new(sample_rate, numerology, 20, false).unwrap();

            assert_eq!(bwp.seconds_per_symbol.len(), bwp.symbols_per_subframe);
            let short = bwp.samples_per_cp(1);
            let long_count = (0..bwp.symbols_per_subframe)
                .filter(|&l| bwp.samples_per_cp(l) > short)
                .count();
            assert_eq!(long_count, 2);
        }
    }

    #[test]
    fn test_fft_size_must_cover_subcarriers() {
        // 106 PRBs need 1272 subcarriers but 3.84 MHz at 15 kHz gives a 256-point FFT
        assert!(BandwidthPart::new(3_840_000, 0, 106, false).is_err());
        assert!(BandwidthPart::new(23_040_000, 0, 106, false).is_ok());
    }

    #[test]
    fn test_invalid_numerology_rejected() {
        assert!(BandwidthPart::new(3_840_000, 6, 20, false).is_err());
    }

    #[test]
    fn test_extended_prefix_uniform() {
        let bwp = BandwidthPart::new(3_840_000, 0, 20, true).unwrap();
        assert_eq!(bwp.symbols_per_slot, 12);
        for l in 0..bwp.symbols_per_subframe {
            assert_eq!(bwp.samples_per_cp(l), 64);
        }
    }
}
