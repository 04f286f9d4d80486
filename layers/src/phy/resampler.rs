//! Fractional Rate Downsampler
//!
//! Converts the full capture rate down to the SSB numerology rate before
//! PSS correlation, with a windowed-sinc anti-aliasing filter. The rate
//! ratio is approximated as a rational L/M and realized as a polyphase
//! FIR bank.

use crate::LayerError;
use num_complex::Complex32;
use std::f32::consts::PI;
use tracing::debug;

/// Filter taps per polyphase branch
const TAPS_PER_PHASE: usize = 64;
/// Cutoff as a fraction of the narrower Nyquist band
const CUTOFF_FACTOR: f64 = 0.45;

/// Polyphase FIR resampler for streaming rate conversion
pub struct Resampler {
    /// Interpolation factor L
    interp_factor: usize,
    /// Decimation factor M
    decim_factor: usize,
    /// Filter coefficients per phase
    polyphase_filters: Vec<Vec<f32>>,
    delay_line: Vec<Complex32>,
    /// Upsampled-grid phase position, in units of 1/L input samples
    phase_accumulator: usize,
}

impl Resampler {
    pub fn new(input_rate: u64, output_rate: u64) -> Result<Self, LayerError> {
        if input_rate == 0 || output_rate == 0 || output_rate > input_rate {
            return Err(LayerError::InvalidConfiguration(format!(
                "cannot downsample {} Hz to {} Hz",
                input_rate, output_rate
            )));
        }

        let divisor = gcd(input_rate, output_rate);
        let interp = (output_rate / divisor) as usize;
        let decim = (input_rate / divisor) as usize;
        if interp > 64 {
            return Err(LayerError::InvalidConfiguration(format!(
                "rate ratio {}/{} too fine to realize",
                interp, decim
            )));
        }

        debug!(
            "Resampler {} Hz -> {} Hz as L/M = {}/{}",
            input_rate, output_rate, interp, decim
        );

        let cutoff_hz = CUTOFF_FACTOR * output_rate.min(input_rate) as f64 / 2.0;
        let taps = design_lowpass_filter(
            TAPS_PER_PHASE * interp,
            cutoff_hz,
            input_rate as f64 * interp as f64,
        );

        // Polyphase decomposition with interpolation gain folded in
        let mut polyphase_filters = vec![vec![0.0f32; TAPS_PER_PHASE]; interp];
        for (i, &tap) in taps.iter().enumerate() {
            polyphase_filters[i % interp][i / interp] = tap * interp as f32;
        }

        Ok(Self {
            interp_factor: interp,
            decim_factor: decim,
            polyphase_filters,
            delay_line: vec![Complex32::new(0.0, 0.0); TAPS_PER_PHASE],
            phase_accumulator: 0,
        })
    }

    /// Ratio of output rate to input rate
    pub fn rate(&self) -> f64 {
        self.interp_factor as f64 / self.decim_factor as f64
    }

    /// Resample a block of input samples, continuing the stream from the
    /// previous call
    pub fn process(&mut self, input: &[Complex32]) -> Vec<Complex32> {
        let mut output = Vec::with_capacity(self.output_size(input.len()));

        for &sample in input {
            self.delay_line.rotate_right(1);
            self.delay_line[0] = sample;

            while self.phase_accumulator < self.interp_factor {
                let filter = &self.polyphase_filters[self.phase_accumulator];
                let mut out_sample = Complex32::new(0.0, 0.0);
                for (tap, &coeff) in filter.iter().enumerate() {
                    out_sample += self.delay_line[tap] * coeff;
                }
                output.push(out_sample);
                self.phase_accumulator += self.decim_factor;
            }
            self.phase_accumulator -= self.interp_factor;
        }

        output
    }

    /// Number of output samples the next `input_size` inputs will produce
    pub fn output_size(&self, input_size: usize) -> usize {
        (input_size * self.interp_factor + self.decim_factor - 1 - self.phase_accumulator)
            / self.decim_factor
    }

    pub fn reset(&mut self) {
        self.delay_line.fill(Complex32::new(0.0, 0.0));
        self.phase_accumulator = 0;
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Windowed-sinc lowpass FIR design (Hamming window), normalized to unit DC
/// gain
fn design_lowpass_filter(num_taps: usize, cutoff_hz: f64, sample_rate: f64) -> Vec<f32> {
    let center = (num_taps - 1) as f32 / 2.0;
    let omega_c = 2.0 * PI * (cutoff_hz / sample_rate) as f32;

    let mut taps: Vec<f32> = (0..num_taps)
        .map(|i| {
            let n = i as f32 - center;
            let sinc = if n.abs() < 1e-10 {
                omega_c / PI
            } else {
                (omega_c * n).sin() / (PI * n)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * i as f32 / (num_taps - 1) as f32).cos();
            sinc * window
        })
        .collect();

    let sum: f32 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= sum;
    }
    taps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_decimation_output_size() {
        // 23.04 MHz capture down to the 3.84 MHz SSB rate is plain 1:6
        let resampler = Resampler::new(23_040_000, 3_840_000).unwrap();
        assert_eq!(resampler.output_size(6), 1);
        assert_eq!(resampler.output_size(6000), 1000);
    }

    #[test]
    fn test_fractional_output_size() {
        let resampler = Resampler::new(15_360_000, 11_520_000).unwrap();
        assert_eq!(resampler.output_size(4), 3);
        assert_eq!(resampler.output_size(1024), 768);
    }

    #[test]
    fn test_dc_passthrough() {
        let mut resampler = Resampler::new(15_360_000, 3_840_000).unwrap();
        let dc = vec![Complex32::new(1.0, 0.0); 1024];
        let output = resampler.process(&dc);

        assert_eq!(output.len(), 256);
        let settled = &output[64..];
        let avg: f32 = settled.iter().map(|s| s.re).sum::<f32>() / settled.len() as f32;
        assert!((avg - 1.0).abs() < 0.1, "DC not preserved: {}", avg);
    }

    #[test]
    fn test_split_stream_equivalence() {
        let signal: Vec<Complex32> = (0..512)
            .map(|i| Complex32::new((i as f32 * 0.05).sin(), (i as f32 * 0.03).cos()))
            .collect();

        let mut whole = Resampler::new(15_360_000, 3_840_000).unwrap();
        let expected = whole.process(&signal);

        let mut chunked = Resampler::new(15_360_000, 3_840_000).unwrap();
        let mut actual = chunked.process(&signal[..200]);
        actual.extend(chunked.process(&signal[200..]));

        assert_eq!(expected, actual);
    }

    #[test]
    fn test_upsampling_rejected() {
        assert!(Resampler::new(3_840_000, 23_040_000).is_err());
    }
}
