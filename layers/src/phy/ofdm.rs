//! Streaming OFDM Demodulation
//!
//! Converts a contiguous complex baseband stream into frequency-domain
//! symbols aligned to the bandwidth part's slot/symbol grid. Fractional
//! symbols at the end of a buffer are carried over to the next call.

use crate::phy::bandwidth_part::BandwidthPart;
use crate::phy::symbol::Symbol;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Streaming OFDM demodulator for one bandwidth part
pub struct OfdmDemodulator {
    bwp: Arc<BandwidthPart>,
    fft: Arc<dyn Fft<f32>>,
    /// Samples left over from the previous buffer (less than one symbol)
    leftover: Vec<Complex32>,
    /// Stream index of the first sample in `leftover`
    stream_position: u64,
    /// Symbol counter within the subframe
    symbol_index: usize,
    /// Slot counter within the frame
    slot_index: usize,
}

impl OfdmDemodulator {
    pub fn new(bwp: Arc<BandwidthPart>) -> Self {
        debug!("Creating OFDM demodulator with nfft={}", bwp.fft_size);
        let fft = FftPlanner::new().plan_fft_forward(bwp.fft_size);

        Self {
            bwp,
            fft,
            leftover: Vec::new(),
            stream_position: 0,
            symbol_index: 0,
            slot_index: 0,
        }
    }

    /// Start demodulation at a symbol other than the first of the subframe.
    /// Used when the stream is known to begin mid-slot (e.g. aligned to the
    /// PSS, the third symbol of the SSB).
    pub fn starting_at_symbol(mut self, symbol_index: usize) -> Self {
        self.symbol_index = symbol_index % self.bwp.symbols_per_subframe;
        self
    }

    /// Adopt an externally tagged stream position for the sample-index
    /// metadata. A no-op once samples are buffered.
    pub fn align_to(&mut self, position: u64) {
        if self.leftover.is_empty() {
            self.stream_position = position;
        }
    }

    /// Demodulate as many full symbols as the buffered stream allows
    pub fn process(&mut self, samples: &[Complex32]) -> Vec<Symbol> {
        self.leftover.extend_from_slice(samples);

        let mut produced = Vec::with_capacity(self.leftover.len() / self.bwp.samples_per_symbol(1));
        let mut position = 0usize;

        while self.leftover.len() - position >= self.bwp.samples_per_symbol(self.symbol_index) {
            let cp_length = self.bwp.samples_per_cp(self.symbol_index);
            let start = position + cp_length;

            let mut frequency = self.leftover[start..start + self.bwp.fft_size].to_vec();
            self.fft.process(&mut frequency);

            // FFT shift and extract the occupied subcarriers around DC
            let half = self.bwp.num_subcarriers / 2;
            let mut resource_elements = Vec::with_capacity(self.bwp.num_subcarriers);
            resource_elements.extend_from_slice(&frequency[self.bwp.fft_size - half..]);
            resource_elements.extend_from_slice(&frequency[..half]);

            produced.push(Symbol::new(
                resource_elements,
                self.symbol_index % self.bwp.symbols_per_slot,
                self.slot_index,
                self.stream_position + position as u64,
            ));

            position += self.bwp.samples_per_symbol(self.symbol_index);
            self.symbol_index += 1;
            if self.symbol_index % self.bwp.symbols_per_slot == 0 {
                self.slot_index = (self.slot_index + 1) % self.bwp.slots_per_frame;
            }
            self.symbol_index %= self.bwp.symbols_per_subframe;
        }

        self.leftover.drain(..position);
        self.stream_position += position as u64;
        produced
    }

    /// Discard buffered state and restart the slot/symbol counters
    pub fn reset(&mut self) {
        self.leftover.clear();
        self.stream_position = 0;
        self.symbol_index = 0;
        self.slot_index = 0;
    }
}

/// OFDM modulator counterpart, used to build time-domain reference signals
/// and by the demodulator tests.
pub struct OfdmModulator {
    bwp: Arc<BandwidthPart>,
    ifft: Arc<dyn Fft<f32>>,
}

impl OfdmModulator {
    pub fn new(bwp: Arc<BandwidthPart>) -> Self {
        let ifft = FftPlanner::new().plan_fft_inverse(bwp.fft_size);
        Self { bwp, ifft }
    }

    /// Modulate symbols into a cyclic-prefixed time-domain stream. The
    /// symbol's subframe position determines its prefix length.
    pub fn modulate(&self, symbols: &[Symbol]) -> Vec<Complex32> {
        let mut time_samples = Vec::with_capacity(
            symbols.len() * (self.bwp.fft_size + self.bwp.samples_per_cp(0)),
        );
        let half = self.bwp.num_subcarriers / 2;
        let scale = 1.0 / self.bwp.fft_size as f32;

        for symbol in symbols {
            // Place the occupied subcarriers around DC (inverse of the
            // demodulator's shift-and-extract)
            let mut frequency = vec![Complex32::new(0.0, 0.0); self.bwp.fft_size];
            frequency[..half].copy_from_slice(&symbol.samples[half..]);
            frequency[self.bwp.fft_size - half..].copy_from_slice(&symbol.samples[..half]);

            self.ifft.process(&mut frequency);
            for value in frequency.iter_mut() {
                *value *= scale;
            }

            let cp_length = self.bwp.samples_per_cp(symbol.symbol_index);
            time_samples.extend_from_slice(&frequency[self.bwp.fft_size - cp_length..]);
            time_samples.extend_from_slice(&frequency);
        }

        time_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bwp() -> Arc<BandwidthPart> {
        Arc::new(BandwidthPart::new(3_840_000, 0, 20, false).unwrap())
    }

    fn test_grid(bwp: &BandwidthPart, num_symbols: usize) -> Vec<Symbol> {
        (0..num_symbols)
            .map(|l| {
                let res: Vec<Complex32> = (0..bwp.num_subcarriers)
                    .map(|k| {
                        let phase = (l * 31 + k * 7) as f32 * 0.1;
                        Complex32::new(phase.cos(), phase.sin())
                    })
                    .collect();
                Symbol::new(res, l % bwp.symbols_per_slot, 0, 0)
            })
            .collect()
    }

    #[test]
    fn test_modulate_demodulate_round_trip() {
        let bwp = test_bwp();
        let grid = test_grid(&bwp, bwp.symbols_per_subframe);

        let time_samples = OfdmModulator::new(bwp.clone()).modulate(&grid);
        let mut demodulator = OfdmDemodulator::new(bwp.clone());
        let symbols = demodulator.process(&time_samples);

        assert_eq!(symbols.len(), grid.len());
        for (rx, tx) in symbols.iter().zip(grid.iter()) {
            assert_eq!(rx.symbol_index, tx.symbol_index);
            for (a, b) in rx.samples.iter().zip(tx.samples.iter()) {
                assert!((a - b).norm() < 1e-3);
            }
        }
    }

    #[test]
    fn test_split_buffer_equivalence() {
        let bwp = test_bwp();
        let grid = test_grid(&bwp, 6);
        let time_samples = OfdmModulator::new(bwp.clone()).modulate(&grid);

        let mut whole = OfdmDemodulator::new(bwp.clone());
        let expected = whole.process(&time_samples);

        let mut chunked = OfdmDemodulator::new(bwp.clone());
        let split = time_samples.len() / 2 + 13;
        let mut actual = chunked.process(&time_samples[..split]);
        actual.extend(chunked.process(&time_samples[split..]));

        assert_eq!(expected.len(), actual.len());
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert_eq!(a.sample_index, b.sample_index);
            assert_eq!(a.samples, b.samples);
        }
    }

    #[test]
    fn test_align_to_offsets_sample_index() {
        let bwp = test_bwp();
        let grid = test_grid(&bwp, 3);
        let time_samples = OfdmModulator::new(bwp.clone()).modulate(&grid);

        let mut demodulator = OfdmDemodulator::new(bwp.clone());
        demodulator.align_to(307_200);
        let symbols = demodulator.process(&time_samples);

        assert_eq!(symbols[0].sample_index, 307_200);
        assert_eq!(
            symbols[1].sample_index,
            307_200 + bwp.samples_per_symbol(0) as u64
        );

        // Re-alignment is ignored while a partial symbol is buffered
        demodulator.process(&time_samples[..10]);
        demodulator.align_to(0);
        let more = demodulator.process(&time_samples[10..]);
        let consumed: usize = (0..3).map(|l| bwp.samples_per_symbol(l)).sum();
        assert_eq!(more[0].sample_index, 307_200 + consumed as u64);
    }

    #[test]
    fn test_symbol_counters_wrap_at_slot() {
        let bwp = test_bwp();
        let grid = test_grid(&bwp, bwp.symbols_per_subframe);
        let time_samples = OfdmModulator::new(bwp.clone()).modulate(&grid);
        // Two subframes worth of samples
        let doubled: Vec<Complex32> = time_samples
            .iter()
            .chain(time_samples.iter())
            .copied()
            .collect();

        let mut demodulator = OfdmDemodulator::new(bwp.clone());
        let symbols = demodulator.process(&doubled);

        assert_eq!(symbols.len(), 2 * bwp.symbols_per_subframe);
        assert_eq!(symbols[0].slot_index, 0);
        assert_eq!(symbols[bwp.symbols_per_slot].slot_index, 1);
        assert_eq!(symbols[bwp.symbols_per_slot].symbol_index, 0);
    }
}
