//! Pseudo-Random (Gold) Sequence Generation
//!
//! Implements the length-31 Gold sequence generator of 3GPP TS 38.211
//! Section 5.2.1, used for PDCCH DMRS and payload scrambling.

use num_complex::Complex32;

/// Number of initial LFSR iterations discarded per TS 38.211 (Nc)
const NC: usize = 1600;

/// Gold sequence generator backed by two 31-bit LFSRs
pub struct GoldSequence {
    x1: u32,
    x2: u32,
}

impl GoldSequence {
    /// Create a new generator for the given initialization value, advancing
    /// past the first Nc=1600 outputs as the specification requires.
    pub fn new(c_init: u32) -> Self {
        // x1 starts with a single one in the lowest position
        let mut generator = Self {
            x1: 0x1,
            x2: c_init & 0x7FFF_FFFF,
        };

        for _ in 0..NC {
            generator.advance();
        }

        generator
    }

    /// Advance both LFSRs by one step
    fn advance(&mut self) {
        // x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFF_FFFF;

        // x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFF_FFFF;
    }

    /// Generate the next bit of the sequence
    pub fn next_bit(&mut self) -> u8 {
        let c = ((self.x1 ^ self.x2) & 1) as u8;
        self.advance();
        c
    }

    /// Generate the next QPSK symbol (two sequence bits)
    pub fn next_qpsk_symbol(&mut self, amplitude: f32) -> Complex32 {
        let c0 = self.next_bit();
        let c1 = self.next_bit();

        Complex32::new(
            amplitude * (1.0 - 2.0 * c0 as f32),
            amplitude * (1.0 - 2.0 * c1 as f32),
        )
    }

    /// Skip n QPSK symbols (2 bits per symbol)
    pub fn skip(&mut self, n_symbols: usize) {
        for _ in 0..(n_symbols * 2) {
            self.advance();
        }
    }
}

/// Generate a full pseudo-random bit sequence of the given length
pub fn pseudo_random_sequence(length: usize, c_init: u32) -> Vec<u8> {
    let mut generator = GoldSequence::new(c_init);
    (0..length).map(|_| generator.next_bit()).collect()
}
