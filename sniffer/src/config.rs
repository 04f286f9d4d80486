//! TOML Configuration Structures
//!
//! One `[[bwp]]` table per bandwidth part to decode, each with a
//! `[bwp.pdcch]` section. The PDCCH section either asks for the SIB1-only
//! preset or overrides individual decoder parameters; anything left out
//! falls back to the preset value.

use anyhow::{bail, Context, Result};
use layers::phy::{BwpPipelineConfig, PdcchTemplate, PhyConfig, SearchSpace};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct SnifferConfig {
    /// Sample rate of the capture in Hz
    pub sample_rate: u64,
    /// Numerology of the SSB
    #[serde(default)]
    pub ssb_numerology: u8,
    /// Pin the PSS search to one NID2 hypothesis (0-2)
    pub nid_2: Option<u8>,
    /// Detection threshold as a factor over the average correlation
    #[serde(default = "default_threshold_factor")]
    pub threshold_factor: f32,
    /// Input I/Q capture (interleaved little-endian f32)
    pub input_file: String,
    /// Optional copy of the synchronized sample stream
    pub output_file: Option<String>,
    /// DCI records as JSON lines; stdout when unset
    pub dci_file: Option<String>,
    /// Samples read from the capture per processing pass
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,
    #[serde(rename = "bwp")]
    pub bwps: Vec<BwpSection>,
}

fn default_threshold_factor() -> f32 {
    1.0
}

fn default_chunk_samples() -> usize {
    30_720
}

/// One bandwidth part to demodulate and search
#[derive(Debug, Clone, Deserialize)]
pub struct BwpSection {
    pub numerology: u8,
    pub num_prbs: u16,
    /// Center offset relative to the capture baseband, in Hz
    #[serde(default)]
    pub frequency_offset_hz: f64,
    pub pdcch: PdcchSection,
}

/// PDCCH decoder parameters. Unset fields take the SIB1 preset values;
/// parameters derived from the cell identity stay derived unless given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PdcchSection {
    /// Search only for the SIB1 scheduling DCI
    #[serde(default)]
    pub si_dci_only: bool,
    pub coreset_id: Option<u8>,
    pub num_prbs: Option<u16>,
    pub duration: Option<usize>,
    pub start_symbol: Option<usize>,
    pub interleaved: Option<bool>,
    pub reg_bundle_size: Option<usize>,
    pub interleaver_size: Option<usize>,
    pub shift_index: Option<u16>,
    pub num_candidates: Option<[usize; 5]>,
    /// Hash the candidates with a UE-specific search space for this RNTI
    pub ue_search_space_rnti: Option<u16>,
    pub scrambling_id_start: Option<u16>,
    pub scrambling_id_end: Option<u16>,
    pub rnti_start: Option<u16>,
    pub rnti_end: Option<u16>,
    pub dci_sizes: Option<Vec<usize>>,
    pub al_correlation_thresholds: Option<[f32; 5]>,
    pub rnti_list_cap: Option<usize>,
}

impl PdcchSection {
    pub fn to_template(&self) -> Result<PdcchTemplate> {
        let mut template = if self.si_dci_only {
            PdcchTemplate::si_dci_only()
        } else {
            // General search: same CORESET 0 geometry but all RNTIs
            PdcchTemplate {
                rntis: (0, 65535),
                ..PdcchTemplate::si_dci_only()
            }
        };

        if let Some(id) = self.coreset_id {
            template.coreset_id = id;
        }
        if let Some(num_prbs) = self.num_prbs {
            template.coreset_num_prbs = num_prbs;
        }
        if let Some(duration) = self.duration {
            template.duration = duration;
        }
        if let Some(start_symbol) = self.start_symbol {
            template.start_symbol = start_symbol;
        }
        if let Some(interleaved) = self.interleaved {
            template.interleaved = interleaved;
        }
        if let Some(bundle) = self.reg_bundle_size {
            template.reg_bundle_size = bundle;
        }
        if let Some(size) = self.interleaver_size {
            template.interleaver_size = size;
        }
        if let Some(shift) = self.shift_index {
            template.shift_index = Some(shift);
        }
        if let Some(candidates) = self.num_candidates {
            template.num_candidates = candidates;
        }
        if let Some(rnti) = self.ue_search_space_rnti {
            template.search_space = SearchSpace::UeSpecific { rnti };
        }
        match (self.scrambling_id_start, self.scrambling_id_end) {
            (Some(start), Some(end)) => template.scrambling_ids = Some((start, end)),
            (Some(id), None) | (None, Some(id)) => template.scrambling_ids = Some((id, id)),
            (None, None) => {}
        }
        if let Some(start) = self.rnti_start {
            template.rntis.0 = start;
        }
        if let Some(end) = self.rnti_end {
            template.rntis.1 = end;
        }
        if let Some(sizes) = &self.dci_sizes {
            template.dci_sizes = sizes.clone();
        }
        if let Some(thresholds) = self.al_correlation_thresholds {
            template.al_correlation_thresholds = thresholds;
        }
        if let Some(cap) = self.rnti_list_cap {
            template.rnti_list_cap = cap;
        }

        if template.rntis.0 > template.rntis.1 {
            bail!(
                "RNTI range {}..{} is empty",
                template.rntis.0,
                template.rntis.1
            );
        }
        Ok(template)
    }
}

impl SnifferConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading {}", path.as_ref().display()))?;
        let config: SnifferConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sample rate must be positive");
        }
        if self.chunk_samples == 0 {
            bail!("chunk size must be at least one sample");
        }
        if self.input_file.is_empty() {
            bail!("no input capture configured");
        }
        if self.bwps.is_empty() {
            bail!("at least one bandwidth part must be configured");
        }
        if let Some(nid2) = self.nid_2 {
            if nid2 > 2 {
                bail!("NID2 {} out of range 0-2", nid2);
            }
        }
        Ok(())
    }

    /// Translate into the PHY layer configuration
    pub fn to_phy_config(&self) -> Result<PhyConfig> {
        let bwps = self
            .bwps
            .iter()
            .map(|bwp| {
                Ok(BwpPipelineConfig {
                    numerology: bwp.numerology,
                    num_prbs: bwp.num_prbs,
                    frequency_offset_hz: bwp.frequency_offset_hz,
                    pdcch: bwp.pdcch.to_template()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PhyConfig {
            sample_rate: self.sample_rate,
            ssb_numerology: self.ssb_numerology,
            pinned_nid2: self.nid_2,
            threshold_factor: self.threshold_factor,
            bwps,
        })
    }
}
