//! CORESET Configuration
//!
//! Control resource set geometry and search-space parameters used by the
//! PDCCH blind decoder, validated against the TS 38.211 CCE-to-REG
//! mapping constraints.

use crate::LayerError;

/// Number of aggregation levels (1, 2, 4, 8, 16)
pub const NUM_AGGREGATION_LEVELS: usize = 5;
/// REGs per CCE
pub const REGS_PER_CCE: usize = 6;

/// CCE-to-REG mapping type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CceToRegMapping {
    NonInterleaved,
    Interleaved,
}

/// One control resource set together with its search-space candidates
#[derive(Debug, Clone)]
pub struct Coreset {
    /// CORESET identifier from RRC (controls the USS hashing constant)
    pub id: u8,
    /// Number of resource blocks the CORESET spans
    pub num_prbs: u16,
    /// Duration in OFDM symbols (1 to 3)
    pub duration: usize,
    /// First OFDM symbol of the CORESET within the slot
    pub start_symbol: usize,
    pub mapping: CceToRegMapping,
    /// REG bundle size L
    pub reg_bundle_size: usize,
    /// Interleaver row count R
    pub interleaver_size: usize,
    /// Interleaver shift n_shift
    pub shift_index: u16,
    /// Candidates monitored per aggregation level 1, 2, 4, 8, 16
    pub num_candidates: [usize; NUM_AGGREGATION_LEVELS],
}

impl Coreset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u8,
        num_prbs: u16,
        duration: usize,
        start_symbol: usize,
        mapping: CceToRegMapping,
        reg_bundle_size: usize,
        interleaver_size: usize,
        shift_index: u16,
        num_candidates: [usize; NUM_AGGREGATION_LEVELS],
    ) -> Result<Self, LayerError> {
        if !(1..=3).contains(&duration) {
            return Err(LayerError::InvalidConfiguration(format!(
                "CORESET duration {} not in 1..=3",
                duration
            )));
        }

        let num_regs = num_prbs as usize * duration;
        if num_regs == 0 || num_regs % REGS_PER_CCE != 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} REGs do not form an integer number of CCEs",
                num_regs
            )));
        }

        if mapping == CceToRegMapping::Interleaved {
            let bundle_ok = match duration {
                3 => matches!(reg_bundle_size, 3 | 6),
                _ => matches!(reg_bundle_size, 2 | 6),
            };
            if !bundle_ok {
                return Err(LayerError::InvalidConfiguration(format!(
                    "REG bundle size {} invalid for duration {}",
                    reg_bundle_size, duration
                )));
            }
            if !matches!(interleaver_size, 2 | 3 | 6) {
                return Err(LayerError::InvalidConfiguration(format!(
                    "interleaver size {} not in {{2, 3, 6}}",
                    interleaver_size
                )));
            }
            if num_regs % (reg_bundle_size * interleaver_size) != 0 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "{} REGs not divisible by bundle size {} times interleaver size {}",
                    num_regs, reg_bundle_size, interleaver_size
                )));
            }
        }

        Ok(Self {
            id,
            num_prbs,
            duration,
            start_symbol,
            mapping,
            reg_bundle_size,
            interleaver_size,
            shift_index,
            num_candidates,
        })
    }

    /// Number of CCEs available in this CORESET
    pub fn num_cces(&self) -> usize {
        self.num_prbs as usize * self.duration / REGS_PER_CCE
    }

    /// Last OFDM symbol of the CORESET within the slot
    pub fn last_symbol(&self) -> usize {
        self.start_symbol + self.duration - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sib1_style_coreset() {
        let coreset = Coreset::new(
            0,
            48,
            1,
            0,
            CceToRegMapping::Interleaved,
            6,
            2,
            102,
            [0, 0, 1, 2, 4],
        )
        .unwrap();
        assert_eq!(coreset.num_cces(), 8);
        assert_eq!(coreset.last_symbol(), 0);
    }

    #[test]
    fn test_bundle_size_constrained_by_duration() {
        let candidates = [8, 4, 2, 1, 0];
        // Bundle 2 is only valid for durations 1 and 2
        assert!(Coreset::new(1, 48, 3, 0, CceToRegMapping::Interleaved, 2, 2, 0, candidates).is_err());
        assert!(Coreset::new(1, 48, 3, 0, CceToRegMapping::Interleaved, 3, 2, 0, candidates).is_ok());
        assert!(Coreset::new(1, 48, 2, 0, CceToRegMapping::Interleaved, 2, 2, 0, candidates).is_ok());
    }

    #[test]
    fn test_regs_must_form_whole_cces() {
        let candidates = [8, 4, 2, 1, 0];
        assert!(Coreset::new(0, 47, 1, 0, CceToRegMapping::NonInterleaved, 6, 2, 0, candidates).is_err());
        assert!(Coreset::new(0, 48, 1, 0, CceToRegMapping::NonInterleaved, 6, 2, 0, candidates).is_ok());
    }

    #[test]
    fn test_interleaver_divisibility() {
        let candidates = [8, 4, 2, 1, 0];
        // 30 REGs with L=2, R=6 would need divisibility by 12
        assert!(Coreset::new(0, 30, 1, 0, CceToRegMapping::Interleaved, 2, 6, 0, candidates).is_err());
        assert!(Coreset::new(0, 24, 1, 0, CceToRegMapping::Interleaved, 2, 6, 0, candidates).is_ok());
    }
}
