//! Physical Layer (PHY) Submodules
//!
//! Receiver-side implementation of the 5G NR downlink control channels
//! according to 3GPP TS 38.211-38.213: cell synchronization, OFDM
//! demodulation and blind PDCCH decoding.

pub mod bandwidth_part;
pub mod coreset;
pub mod dmrs;
pub mod dsp;
pub mod ofdm;
pub mod pdcch;
pub mod pn_sequences;
pub mod polar;
pub mod pss_sss;
pub mod resampler;
pub mod symbol;
pub mod syncer;

// Re-export commonly used types
pub use bandwidth_part::BandwidthPart;
pub use coreset::{CceToRegMapping, Coreset, NUM_AGGREGATION_LEVELS};
pub use ofdm::{OfdmDemodulator, OfdmModulator};
pub use pdcch::{Dci, Pdcch, PdcchConfig, SearchSpace, DEFAULT_AL_THRESHOLDS};
pub use symbol::Symbol;
pub use syncer::{MibObserver, SyncState, Syncer, SyncerConfig, SyncerEvent};

use crate::LayerError;
use common::types::{Pci, Rnti};
use dsp::Rotator;
use num_complex::Complex32;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// PDCCH decoder parameters that can only be completed once the cell
/// identity is known. Fields left as `None` take the cell identity at
/// lock time.
#[derive(Debug, Clone)]
pub struct PdcchTemplate {
    pub coreset_id: u8,
    pub coreset_num_prbs: u16,
    pub duration: usize,
    pub start_symbol: usize,
    pub interleaved: bool,
    pub reg_bundle_size: usize,
    pub interleaver_size: usize,
    pub shift_index: Option<u16>,
    pub num_candidates: [usize; NUM_AGGREGATION_LEVELS],
    pub search_space: SearchSpace,
    /// Inclusive scrambling identity sweep range
    pub scrambling_ids: Option<(u16, u16)>,
    /// Inclusive RNTI range seeding the priority list
    pub rntis: (u16, u16),
    pub dci_sizes: Vec<usize>,
    pub al_correlation_thresholds: [f32; NUM_AGGREGATION_LEVELS],
    pub rnti_list_cap: usize,
}

impl PdcchTemplate {
    /// Decode only the SIB1 scheduling DCI: the CORESET 0 geometry signaled
    /// in the MIB with everything derived from the cell identity, and the
    /// SI-RNTI as the single search target
    pub fn si_dci_only() -> Self {
        Self {
            coreset_id: 0,
            coreset_num_prbs: 48,
            duration: 1,
            start_symbol: 0,
            interleaved: true,
            reg_bundle_size: 6,
            interleaver_size: 2,
            shift_index: None,
            num_candidates: [8, 4, 2, 1, 0],
            search_space: SearchSpace::Common,
            scrambling_ids: None,
            rntis: (Rnti::SI.value(), Rnti::SI.value()),
            dci_sizes: vec![39],
            al_correlation_thresholds: DEFAULT_AL_THRESHOLDS,
            rnti_list_cap: usize::MAX,
        }
    }

    /// Complete the template against the locked cell identity
    pub fn resolve(&self, cell: Pci) -> Result<PdcchConfig, LayerError> {
        let mapping = if self.interleaved {
            CceToRegMapping::Interleaved
        } else {
            CceToRegMapping::NonInterleaved
        };
        let coreset = Coreset::new(
            self.coreset_id,
            self.coreset_num_prbs,
            self.duration,
            self.start_symbol,
            mapping,
            self.reg_bundle_size,
            self.interleaver_size,
            self.shift_index.unwrap_or(cell.0),
            self.num_candidates,
        )?;
        let (scrambling_id_start, scrambling_id_end) =
            self.scrambling_ids.unwrap_or((cell.0, cell.0));

        Ok(PdcchConfig {
            coreset,
            search_space: self.search_space,
            cell_id: cell.0,
            scrambling_id_start,
            scrambling_id_end,
            rnti_start: self.rntis.0,
            rnti_end: self.rntis.1,
            dci_sizes: self.dci_sizes.clone(),
            al_correlation_thresholds: self.al_correlation_thresholds,
            rnti_list_cap: self.rnti_list_cap,
        })
    }
}

/// One bandwidth part to demodulate and blind-decode
#[derive(Debug, Clone)]
pub struct BwpPipelineConfig {
    pub numerology: u8,
    pub num_prbs: u16,
    /// Center frequency offset of this bandwidth part relative to the
    /// received baseband, in Hz
    pub frequency_offset_hz: f64,
    pub pdcch: PdcchTemplate,
}

/// Synchronized samples handed to a pipeline
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub samples: Vec<Complex32>,
    pub sample_index: u64,
}

/// Decoding pipeline for one bandwidth part, running on its own task.
/// Producers never wait on it: batches queue on an unbounded channel and
/// confirmed DCIs flow out through the shared sink.
pub struct BwpPipeline {
    input: mpsc::UnboundedSender<SampleBatch>,
}

impl BwpPipeline {
    pub fn spawn(
        sample_rate: u64,
        config: &BwpPipelineConfig,
        cell: Pci,
        dci_sink: mpsc::UnboundedSender<Dci>,
    ) -> Result<Self, LayerError> {
        let bwp = Arc::new(BandwidthPart::new(
            sample_rate,
            config.numerology,
            config.num_prbs,
            false,
        )?);
        let mut pdcch = Pdcch::new(Arc::clone(&bwp), config.pdcch.resolve(cell)?)?;
        let mut demodulator = OfdmDemodulator::new(bwp);
        // Shift the bandwidth part of interest onto DC before demodulating
        let mut rotator = Rotator::new(-config.frequency_offset_hz, sample_rate as f64);
        let (input, mut receiver) = mpsc::unbounded_channel::<SampleBatch>();

        tokio::spawn(async move {
            let mut aligned = false;
            while let Some(mut batch) = receiver.recv().await {
                // Carry the synchronizer's cumulative sample counter into
                // the symbol metadata
                if !aligned {
                    demodulator.align_to(batch.sample_index);
                    aligned = true;
                }
                rotator.process(&mut batch.samples);
                for mut symbol in demodulator.process(&batch.samples) {
                    match pdcch.process(&mut symbol) {
                        Ok(dcis) => {
                            for dci in dcis {
                                if dci_sink.send(dci).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("PDCCH processing failed: {}", e),
                    }
                }
            }
        });

        Ok(Self { input })
    }

    /// Queue one batch without blocking. Returns false once the pipeline
    /// task has gone away.
    pub fn send(&self, batch: SampleBatch) -> bool {
        self.input.send(batch).is_ok()
    }
}

/// PHY layer configuration
#[derive(Debug, Clone)]
pub struct PhyConfig {
    pub sample_rate: u64,
    pub ssb_numerology: u8,
    /// Restrict the PSS search to one NID2 hypothesis
    pub pinned_nid2: Option<u8>,
    /// Detection threshold as a factor over the average correlation
    pub threshold_factor: f32,
    pub bwps: Vec<BwpPipelineConfig>,
}

/// Receive-side PHY: the synchronizer in front of one decoding pipeline
/// per configured bandwidth part. Pipelines are built once per
/// acquisition, when the cell identity completes their configuration,
/// and dropped when the lock is lost or the layer is reset.
pub struct Phy {
    config: PhyConfig,
    syncer: Syncer,
    pipelines: Vec<BwpPipeline>,
    dci_sink: mpsc::UnboundedSender<Dci>,
}

impl Phy {
    pub fn new(
        config: PhyConfig,
        observer: Box<dyn MibObserver>,
        dci_sink: mpsc::UnboundedSender<Dci>,
    ) -> Result<Self, LayerError> {
        if config.bwps.is_empty() {
            return Err(LayerError::InvalidConfiguration(
                "no bandwidth parts configured".into(),
            ));
        }

        let syncer = Syncer::new(
            SyncerConfig {
                sample_rate: config.sample_rate,
                ssb_numerology: config.ssb_numerology,
                pinned_nid2: config.pinned_nid2,
                threshold_factor: config.threshold_factor,
            },
            observer,
        )?;

        Ok(Self {
            config,
            syncer,
            pipelines: Vec::new(),
            dci_sink,
        })
    }

    pub fn cell(&self) -> Option<Pci> {
        self.syncer.cell()
    }

    pub fn in_synch(&self) -> bool {
        self.syncer.in_synch()
    }

    /// Feed one chunk of baseband samples through the synchronizer and fan
    /// the aligned output out to the pipelines. Returns the synchronized
    /// batches so callers can record the aligned stream.
    pub fn process(&mut self, samples: &[Complex32]) -> Result<Vec<SampleBatch>, LayerError> {
        let mut relayed = Vec::new();
        for event in self.syncer.process(samples)? {
            match event {
                SyncerEvent::Synchronized { cell, cfo } => {
                    info!(
                        "starting {} pipeline(s) for cell {} (cfo {:.1} Hz)",
                        self.config.bwps.len(),
                        cell.0,
                        cfo
                    );
                    self.pipelines = self
                        .config
                        .bwps
                        .iter()
                        .map(|bwp| {
                            BwpPipeline::spawn(
                                self.config.sample_rate,
                                bwp,
                                cell,
                                self.dci_sink.clone(),
                            )
                        })
                        .collect::<Result<_, _>>()?;
                }
                SyncerEvent::Samples {
                    samples,
                    sample_index,
                } => {
                    let batch = SampleBatch {
                        samples,
                        sample_index,
                    };
                    for pipeline in &self.pipelines {
                        if !pipeline.send(batch.clone()) {
                            warn!("pipeline receiver dropped, discarding batch");
                        }
                    }
                    relayed.push(batch);
                }
                SyncerEvent::LockLost => {
                    warn!("lock lost, dropping pipelines until the next acquisition");
                    self.pipelines.clear();
                }
            }
        }
        Ok(relayed)
    }

    /// Discard buffered state, drop the pipelines and restart acquisition
    pub fn reset(&mut self) {
        self.pipelines.clear();
        self.syncer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::pdcch::testing::{sib1_config, synthesize_sib1_symbol, test_bwp};
    use crate::phy::syncer::AlwaysDecodes;
    use std::time::Duration;

    #[test]
    fn test_si_template_resolves_from_cell_identity() {
        let cell = Pci::new(102).unwrap();
        let config = PdcchTemplate::si_dci_only().resolve(cell).unwrap();

        assert_eq!(config.cell_id, 102);
        assert_eq!(config.coreset.shift_index, 102);
        assert_eq!(config.scrambling_id_start, 102);
        assert_eq!(config.scrambling_id_end, 102);
        assert_eq!(config.rnti_start, Rnti::SI.value());
        assert_eq!(config.rnti_end, Rnti::SI.value());
        assert_eq!(config.coreset.num_candidates, [8, 4, 2, 1, 0]);
    }

    #[test]
    fn test_explicit_shift_overrides_cell_identity() {
        let template = PdcchTemplate {
            shift_index: Some(160),
            scrambling_ids: Some((100, 110)),
            ..PdcchTemplate::si_dci_only()
        };
        let config = template.resolve(Pci::new(7).unwrap()).unwrap();

        assert_eq!(config.coreset.shift_index, 160);
        assert_eq!(config.scrambling_id_start, 100);
        assert_eq!(config.scrambling_id_end, 110);
        assert_eq!(config.cell_id, 7);
    }

    #[test]
    fn test_phy_requires_bandwidth_parts() {
        let (dci_tx, _dci_rx) = mpsc::unbounded_channel();
        let config = PhyConfig {
            sample_rate: 15_360_000,
            ssb_numerology: 0,
            pinned_nid2: None,
            threshold_factor: 1.0,
            bwps: Vec::new(),
        };
        assert!(Phy::new(config, Box::new(AlwaysDecodes), dci_tx).is_err());
    }

    #[tokio::test]
    async fn test_pipeline_decodes_modulated_symbol() {
        // Borrow the decoder's candidate tables to place a SIB1 DCI, then
        // run it through the full time-domain pipeline
        let bwp = test_bwp();
        let reference = Pdcch::new(Arc::clone(&bwp), sib1_config()).unwrap();
        let payload: Vec<u8> = (0..39).map(|i| ((i * 11 + 2) % 3 == 0) as u8).collect();
        let symbol = synthesize_sib1_symbol(&reference, &payload, Rnti::SI);
        let samples = OfdmModulator::new(Arc::clone(&bwp)).modulate(&[symbol]);

        let config = BwpPipelineConfig {
            numerology: 0,
            num_prbs: 48,
            frequency_offset_hz: 0.0,
            pdcch: PdcchTemplate::si_dci_only(),
        };
        let (dci_tx, mut dci_rx) = mpsc::unbounded_channel();
        let pipeline =
            BwpPipeline::spawn(15_360_000, &config, Pci::new(102).unwrap(), dci_tx).unwrap();

        assert!(pipeline.send(SampleBatch {
            samples,
            sample_index: 0,
        }));
        drop(pipeline);

        let dci = tokio::time::timeout(Duration::from_secs(30), dci_rx.recv())
            .await
            .expect("pipeline timed out")
            .expect("pipeline dropped the DCI sink without a detection");

        assert_eq!(dci.rnti, Rnti::SI);
        assert_eq!(dci.payload, payload);
        assert_eq!(dci.scrambling_id, 102);
    }
}
