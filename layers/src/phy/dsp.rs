//! DSP Kernels
//!
//! Cross-correlation and frequency-rotation primitives shared by the
//! synchronizer and the PDCCH decoder.

use num_complex::Complex32;
use std::f32::consts::PI;

/// Valid-mode sliding cross-correlation of `samples` against `reference`.
/// Produces one complex dot product per alignment.
pub fn correlate(samples: &[Complex32], reference: &[Complex32]) -> Vec<Complex32> {
    if samples.len() < reference.len() || reference.is_empty() {
        return Vec::new();
    }

    let num_outputs = samples.len() - reference.len() + 1;
    let mut outputs = Vec::with_capacity(num_outputs);

    for offset in 0..num_outputs {
        let mut acc = Complex32::new(0.0, 0.0);
        for (i, r) in reference.iter().enumerate() {
            acc += samples[offset + i] * r.conj();
        }
        outputs.push(acc);
    }

    outputs
}

/// Magnitude of the valid-mode sliding cross-correlation
pub fn correlate_magnitude(samples: &[Complex32], reference: &[Complex32]) -> Vec<f32> {
    correlate(samples, reference)
        .into_iter()
        .map(|c| c.norm())
        .collect()
}

/// Normalized correlation magnitude between two equal-length sequences:
/// |sum(a * conj(b))| / (||a|| * ||b||). A value of 1.0 is a perfect
/// phase- and amplitude-independent match.
pub fn correlate_normalized(a: &[Complex32], b: &[Complex32]) -> f32 {
    let len = a.len().min(b.len());
    let mut acc = Complex32::new(0.0, 0.0);
    let mut power_a = 0.0f32;
    let mut power_b = 0.0f32;

    for i in 0..len {
        acc += a[i] * b[i].conj();
        power_a += a[i].norm_sqr();
        power_b += b[i].norm_sqr();
    }

    if power_a > 0.0 && power_b > 0.0 {
        acc.norm() / (power_a * power_b).sqrt()
    } else {
        0.0
    }
}

/// Windowed correlation of a signal with a delayed copy of itself. Output i
/// is the dot product of `samples[i..i+window]` with `delayed[i..i+window]`,
/// used to measure the phase rotation across cyclic prefix boundaries.
pub fn moving_correlate(
    samples: &[Complex32],
    delayed: &[Complex32],
    window: usize,
) -> Vec<Complex32> {
    let len = samples.len().min(delayed.len());
    if len < window || window == 0 {
        return Vec::new();
    }

    let mut outputs = Vec::with_capacity(len - window + 1);
    for offset in 0..=(len - window) {
        let mut acc = Complex32::new(0.0, 0.0);
        for i in 0..window {
            acc += samples[offset + i] * delayed[offset + i].conj();
        }
        outputs.push(acc);
    }

    outputs
}

/// Streaming frequency shifter keeping phase continuity across chunks
pub struct Rotator {
    /// Phase advance per sample in radians
    step: f64,
    phase: f64,
}

impl Rotator {
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        Self {
            step: 2.0 * std::f64::consts::PI * frequency / sample_rate,
            phase: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [Complex32]) {
        if self.step == 0.0 {
            return;
        }
        for sample in samples.iter_mut() {
            *sample *= Complex32::new(self.phase.cos() as f32, self.phase.sin() as f32);
            self.phase += self.step;
            if self.phase > 2.0 * std::f64::consts::PI {
                self.phase -= 2.0 * std::f64::consts::PI;
            }
        }
    }
}

/// Rotate samples in place by `frequency` Hz at the given sample rate
pub fn rotate(samples: &mut [Complex32], frequency: f32, sample_rate: f64) {
    if frequency == 0.0 {
        return;
    }

    let step = 2.0 * PI * frequency / sample_rate as f32;
    for (i, sample) in samples.iter_mut().enumerate() {
        let phase = step * i as f32;
        *sample *= Complex32::new(phase.cos(), phase.sin());
    }
}
