//! Common Types for the 5G NR Sniffer
//!
//! Defines fundamental identity types used throughout the decoding pipeline

use serde::{Deserialize, Serialize};

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// System Information RNTI (TS 38.321 Table 7.1-1)
    pub const SI: Self = Self(65535);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether this RNTI falls in the range normally assigned to UEs.
    /// Values at the edges are reserved (SI/RA/P-RNTI and friends).
    pub fn is_ue_range(&self) -> bool {
        self.0 > 100 && self.0 < 65520
    }
}

/// Physical Cell Identity, composed of NID1 (0-335) and NID2 (0-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Compose a PCI from its SSS/PSS identity components
    pub fn from_nids(nid1: u16, nid2: u8) -> Option<Self> {
        if nid1 <= 335 && nid2 <= 2 {
            Some(Self(3 * nid1 + nid2 as u16))
        } else {
            None
        }
    }

    /// Cell identity group, determined by the SSS
    pub fn nid1(&self) -> u16 {
        self.0 / 3
    }

    /// Identity within the group, determined by the PSS
    pub fn nid2(&self) -> u8 {
        (self.0 % 3) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_pci_nid_composition() {
        let pci = Pci::from_nids(34, 0).unwrap();
        assert_eq!(pci.0, 102);
        assert_eq!(pci.nid1(), 34);
        assert_eq!(pci.nid2(), 0);
        assert!(Pci::from_nids(336, 0).is_none());
        assert!(Pci::from_nids(0, 3).is_none());
    }

    #[test]
    fn test_rnti_ranges() {
        assert!(!Rnti::SI.is_ue_range());
        assert!(!Rnti::new(0).is_ue_range());
        assert!(Rnti::new(4660).is_ue_range());
    }
}
