//! PDCCH Blind Decoder
//!
//! Searches every configured scrambling identity, aggregation level and
//! search-space candidate of one CORESET for DCI transmissions. DMRS
//! correlation promotes candidates to speculative detections; a polar
//! decode with CRC24C validation confirms them. Reference sequences and
//! subcarrier index tables are precomputed per (scrambling id, aggregation
//! level, slot, candidate).

use crate::phy::bandwidth_part::BandwidthPart;
use crate::phy::coreset::{CceToRegMapping, Coreset, NUM_AGGREGATION_LEVELS, REGS_PER_CCE};
use crate::phy::dmrs::pdcch_dmrs_symbols;
use crate::phy::dsp::correlate_normalized;
use crate::phy::pn_sequences::pseudo_random_sequence;
use crate::phy::polar::{self, k_bit_deinterleave, PolarCode, PolarDecoder};
use crate::phy::symbol::Symbol;
use crate::LayerError;
use common::types::Rnti;
use common::utils::{bytes_to_hex, crc24c_bits, pack_bits};
use num_complex::Complex32;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// CRC length appended to every DCI payload
pub const DCI_CRC_LENGTH: usize = 24;
/// DMRS subcarrier offsets within one resource block
const DMRS_RE_OFFSETS: [usize; 3] = [1, 5, 9];
/// Data subcarrier offsets within one resource block
const DATA_RE_OFFSETS: [usize; 9] = [0, 2, 3, 4, 6, 7, 8, 10, 11];
/// USS hashing constants indexed by CORESET id mod 3 (TS 38.213 10.1)
const YP_CONSTANTS: [u64; 3] = [39827, 39829, 39839];
/// Repetition metric must exceed this factor times the mean to pick an RNTI
const REPETITION_FACTOR: f32 = 1.05;

/// Search space flavor, determining the candidate hashing seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSpace {
    Common,
    UeSpecific { rnti: u16 },
}

/// Decoder configuration for one CORESET
#[derive(Debug, Clone)]
pub struct PdcchConfig {
    pub coreset: Coreset,
    pub search_space: SearchSpace,
    /// Physical cell identity, used for system-information descrambling
    pub cell_id: u16,
    /// Inclusive range of PDCCH DMRS scrambling identities to sweep
    pub scrambling_id_start: u16,
    pub scrambling_id_end: u16,
    /// Inclusive range seeding the RNTI priority list
    pub rnti_start: u16,
    pub rnti_end: u16,
    /// DCI payload sizes to attempt, in bits
    pub dci_sizes: Vec<usize>,
    /// Correlation thresholds per aggregation level 1, 2, 4, 8, 16
    pub al_correlation_thresholds: [f32; NUM_AGGREGATION_LEVELS],
    /// Maximum RNTIs tried per candidate on the exhaustive path
    pub rnti_list_cap: usize,
}

/// Default correlation thresholds per aggregation level
pub const DEFAULT_AL_THRESHOLDS: [f32; NUM_AGGREGATION_LEVELS] = [0.9, 0.8, 0.7, 0.15, 0.15];

/// A confirmed, CRC-validated DCI detection
#[derive(Debug, Clone, Serialize)]
pub struct Dci {
    pub rnti: Rnti,
    pub aggregation_level: usize,
    pub candidate: usize,
    pub coreset_id: u8,
    pub scrambling_id: u16,
    pub slot: usize,
    pub symbol: usize,
    /// Decoded payload bits
    pub payload: Vec<u8>,
    pub payload_size: usize,
    /// DMRS correlation of the detection
    pub correlation: f32,
    /// Relative channel-quality ranking in dB, only comparable within one
    /// symbol
    pub ranking_db: f32,
    /// Stream index of the first sample of the carrying symbol
    pub sample_index: u64,
}

impl Dci {
    /// Payload bits packed MSB-first and rendered as hex
    pub fn payload_hex(&self) -> String {
        bytes_to_hex(&pack_bits(&self.payload))
    }
}

/// Candidate detection awaiting polar decode, scoped to one symbol pass
#[derive(Debug, Clone)]
struct SpeculativeDci {
    scrambling_id: u16,
    al_index: usize,
    candidate: usize,
    slot: usize,
    symbol: usize,
    correlation: f32,
}

/// Precomputed per-candidate lookup tables
struct CandidateTables {
    /// DMRS reference symbols, one sequence per CORESET symbol
    dmrs_reference: Vec<Vec<Complex32>>,
    /// Subcarrier indices of the candidate's DMRS resource elements
    dmrs_indices: Vec<usize>,
    /// Subcarrier indices of the candidate's data resource elements
    data_indices: Vec<usize>,
    /// Sorted CCE indices, used for subsumption checks
    cce_indices: Vec<usize>,
}

type TableKey = (u16, usize, usize, usize);

/// RNTI priority list shared across concurrent decode attempts. Confirmed
/// values move to the front so likely-active identifiers are tried first.
pub struct RntiList {
    values: Mutex<Vec<u16>>,
}

impl RntiList {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            values: Mutex::new((start..=end).collect()),
        }
    }

    /// Move a confirmed RNTI to the front. Returns false when the value is
    /// not in the list, leaving it unchanged.
    pub fn promote(&self, rnti: Rnti) -> bool {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match values.iter().position(|&v| v == rnti.value()) {
            Some(position) => {
                let value = values.remove(position);
                values.insert(0, value);
                true
            }
            None => false,
        }
    }

    /// Copy of the first `cap` values in priority order
    pub fn snapshot(&self, cap: usize) -> Vec<u16> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.iter().take(cap).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Blind decoder state for one CORESET within one bandwidth part
pub struct Pdcch {
    config: PdcchConfig,
    bwp: Arc<BandwidthPart>,
    tables: HashMap<TableKey, CandidateTables>,
    rnti_list: Arc<RntiList>,
    speculative: Vec<SpeculativeDci>,
}

impl Pdcch {
    pub fn new(bwp: Arc<BandwidthPart>, config: PdcchConfig) -> Result<Self, LayerError> {
        if config.scrambling_id_start > config.scrambling_id_end {
            return Err(LayerError::InvalidConfiguration(format!(
                "scrambling id range {}..{} is empty",
                config.scrambling_id_start, config.scrambling_id_end
            )));
        }
        if config.rnti_start > config.rnti_end {
            return Err(LayerError::InvalidConfiguration(format!(
                "RNTI range {}..{} is empty",
                config.rnti_start, config.rnti_end
            )));
        }
        if config.dci_sizes.is_empty() {
            return Err(LayerError::InvalidConfiguration(
                "no DCI payload sizes configured".into(),
            ));
        }
        for &size in &config.dci_sizes {
            if size == 0 || size + DCI_CRC_LENGTH > polar::MAX_INTERLEAVED_BITS {
                return Err(LayerError::InvalidConfiguration(format!(
                    "DCI payload size {} outside the decodable range 1..={}",
                    size,
                    polar::MAX_INTERLEAVED_BITS - DCI_CRC_LENGTH
                )));
            }
        }
        if 12 * config.coreset.num_prbs as usize * config.coreset.duration > bwp.num_subcarriers {
            return Err(LayerError::InvalidConfiguration(format!(
                "CORESET of {} PRBs over {} symbols exceeds bandwidth part of {} subcarriers",
                config.coreset.num_prbs, config.coreset.duration, bwp.num_subcarriers
            )));
        }

        let tables = Self::build_tables(&bwp, &config);
        let rnti_list = Arc::new(RntiList::new(config.rnti_start, config.rnti_end));

        debug!(
            "PDCCH decoder ready: {} candidate tables, {} RNTIs",
            tables.len(),
            rnti_list.len()
        );

        Ok(Self {
            config,
            bwp,
            tables,
            rnti_list,
            speculative: Vec::new(),
        })
    }

    /// Handle to the shared RNTI priority list
    pub fn rnti_list(&self) -> Arc<RntiList> {
        Arc::clone(&self.rnti_list)
    }

    /// Blind-decode one OFDM symbol. Returns all confirmed DCIs; finding
    /// none is the expected steady state.
    pub fn process(&mut self, symbol: &mut Symbol) -> Result<Vec<Dci>, LayerError> {
        let coreset = &self.config.coreset;
        if symbol.symbol_index < coreset.start_symbol || symbol.symbol_index > coreset.last_symbol()
        {
            return Ok(Vec::new());
        }

        self.correlate_dmrs(symbol);
        let confirmed = self.decode_speculative(symbol)?;
        self.speculative.clear();
        Ok(confirmed)
    }

    /// Sweep every (scrambling id, aggregation level, candidate) hypothesis
    /// against the symbol's DMRS resource elements
    fn correlate_dmrs(&mut self, symbol: &Symbol) {
        let coreset_symbol = symbol.symbol_index - self.config.coreset.start_symbol;

        for scrambling_id in self.config.scrambling_id_start..=self.config.scrambling_id_end {
            for al_index in 0..NUM_AGGREGATION_LEVELS {
                for candidate in 0..self.config.coreset.num_candidates[al_index] {
                    let key = (scrambling_id, al_index, symbol.slot_index, candidate);
                    let Some(tables) = self.tables.get(&key) else {
                        continue;
                    };

                    let received: Vec<Complex32> = tables
                        .dmrs_indices
                        .iter()
                        .filter_map(|&i| symbol.samples.get(i).copied())
                        .collect();
                    if received.len() != tables.dmrs_indices.len() {
                        continue;
                    }

                    let correlation =
                        correlate_normalized(&received, &tables.dmrs_reference[coreset_symbol]);
                    if correlation > self.config.al_correlation_thresholds[al_index] {
                        trace!(
                            "speculative DCI: scrambling {} AL {} candidate {} corr {:.3}",
                            scrambling_id,
                            1 << al_index,
                            candidate,
                            correlation
                        );
                        self.speculative.push(SpeculativeDci {
                            scrambling_id,
                            al_index,
                            candidate,
                            slot: symbol.slot_index,
                            symbol: symbol.symbol_index,
                            correlation,
                        });
                    }
                }
            }
        }
    }

    /// Work through speculative detections in descending aggregation-level
    /// order, equalizing and polar-decoding each
    fn decode_speculative(&mut self, symbol: &mut Symbol) -> Result<Vec<Dci>, LayerError> {
        let mut confirmed = Vec::new();

        while let Some(best_al) = self.speculative.iter().map(|s| s.al_index).max() {
            let Some(position) = self.speculative.iter().position(|s| s.al_index == best_al)
            else {
                break;
            };
            let spec = self.speculative.remove(position);

            if let Some(dci) = self.decode_candidate(symbol, &spec)? {
                self.rnti_list.promote(dci.rnti);
                if spec.al_index > 0 {
                    self.delete_subsumed(&spec);
                }
                confirmed.push(dci);
            }
        }

        Ok(confirmed)
    }

    /// Attempt every configured payload size and the RNTI search strategy
    /// appropriate for the candidate's aggregation level
    fn decode_candidate(
        &self,
        symbol: &mut Symbol,
        spec: &SpeculativeDci,
    ) -> Result<Option<Dci>, LayerError> {
        let key = (spec.scrambling_id, spec.al_index, spec.slot, spec.candidate);
        let tables = self.tables.get(&key).ok_or_else(|| {
            LayerError::ProcessingError(format!("missing candidate table for {:?}", key))
        })?;

        let coreset_symbol = spec.symbol - self.config.coreset.start_symbol;
        symbol.channel_estimate(
            equalization_key(&key),
            &tables.dmrs_reference[coreset_symbol],
            &tables.dmrs_indices,
        )?;

        let mut llrs = Vec::with_capacity(2 * tables.data_indices.len());
        for &index in &tables.data_indices {
            let sample = symbol.samples_eq.get(index).ok_or_else(|| {
                LayerError::ProcessingError(format!(
                    "data index {} outside symbol of {} subcarriers",
                    index,
                    symbol.samples_eq.len()
                ))
            })?;
            llrs.push(sample.re);
            llrs.push(sample.im);
        }

        for &dci_size in &self.config.dci_sizes {
            let Ok(code) = PolarCode::new(dci_size + DCI_CRC_LENGTH, llrs.len()) else {
                continue;
            };

            // High aggregation levels first try the cheap repetition
            // heuristic; low levels walk the priority list exhaustively
            let payload = if spec.al_index >= 3 {
                let broadcast_range = self.config.rnti_start < 65520 && self.config.rnti_end > 100;
                if broadcast_range {
                    self.try_decode(&llrs, &code, Rnti::new(0), spec.scrambling_id, dci_size, true)?
                } else {
                    self.try_rnti_list(&llrs, &code, spec.scrambling_id, dci_size, true)?
                }
            } else {
                self.try_rnti_list(&llrs, &code, spec.scrambling_id, dci_size, false)?
            };

            if let Some((rnti, payload)) = payload {
                debug!(
                    "DCI confirmed: rnti {} AL {} candidate {} size {}",
                    rnti.value(),
                    1 << spec.al_index,
                    spec.candidate,
                    dci_size
                );
                return Ok(Some(Dci {
                    rnti,
                    aggregation_level: 1 << spec.al_index,
                    candidate: spec.candidate,
                    coreset_id: self.config.coreset.id,
                    scrambling_id: spec.scrambling_id,
                    slot: spec.slot,
                    symbol: spec.symbol,
                    payload,
                    payload_size: dci_size,
                    correlation: spec.correlation,
                    ranking_db: symbol.channel_ranking_db(),
                    sample_index: symbol.sample_index,
                }));
            }
        }

        Ok(None)
    }

    /// Decode attempts over the RNTI priority list, stopping at the first
    /// CRC match
    fn try_rnti_list(
        &self,
        llrs: &[f32],
        code: &PolarCode,
        scrambling_id: u16,
        dci_size: usize,
        repetition: bool,
    ) -> Result<Option<(Rnti, Vec<u8>)>, LayerError> {
        for rnti in self.rnti_list.snapshot(self.config.rnti_list_cap) {
            if let Some(result) =
                self.try_decode(llrs, code, Rnti::new(rnti), scrambling_id, dci_size, repetition)?
            {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// One descramble-decode-CRC attempt. With `repetition` set, the
    /// repeated-block agreement heuristic may replace the starting RNTI
    /// before the decode; only the CRC outcome confirms anything.
    fn try_decode(
        &self,
        llrs: &[f32],
        code: &PolarCode,
        rnti: Rnti,
        scrambling_id: u16,
        dci_size: usize,
        repetition: bool,
    ) -> Result<Option<(Rnti, Vec<u8>)>, LayerError> {
        let mut rnti = rnti;
        if repetition {
            if let Some(hinted) = self.repetition_rnti(llrs, code.n(), scrambling_id) {
                rnti = hinted;
            }
        }

        // System information convention: anything outside the UE range, or a
        // scrambling id that is not this cell, descrambles with (0, cell id)
        let c_init = if rnti.is_ue_range() && scrambling_id != self.config.cell_id {
            (((rnti.value() as u32) << 16) + scrambling_id as u32) & 0x7FFF_FFFF
        } else {
            self.config.cell_id as u32
        };

        let scrambling = pseudo_random_sequence(llrs.len(), c_init);
        let descrambled: Vec<f32> = llrs
            .iter()
            .zip(scrambling.iter())
            .map(|(&llr, &bit)| if bit == 1 { -llr } else { llr })
            .collect();

        let info = PolarDecoder::decode(code, &descrambled)?;
        let bits = k_bit_deinterleave(&info);
        let (payload, crc_bits) = bits.split_at(dci_size);

        let mut received_crc = 0u32;
        for &bit in crc_bits {
            received_crc = (received_crc << 1) | bit as u32;
        }
        // The transmitter masks the last 16 CRC bits with the RNTI
        received_crc ^= rnti.value() as u32;

        let mut crc_input = vec![1u8; DCI_CRC_LENGTH];
        crc_input.extend_from_slice(payload);

        if crc24c_bits(&crc_input) == received_crc {
            Ok(Some((rnti, payload.to_vec())))
        } else {
            Ok(None)
        }
    }

    /// Repetition heuristic: rate matching at high aggregation levels
    /// repeats the N-bit code word, so the RNTI whose descrambling maximizes
    /// agreement between repeated positions is the likely sender. Applies
    /// only when the metric clearly beats the mean over all RNTIs.
    fn repetition_rnti(&self, llrs: &[f32], n: usize, scrambling_id: u16) -> Option<Rnti> {
        let e = llrs.len();
        if e <= n {
            return None;
        }

        let rntis = self.rnti_list.snapshot(usize::MAX);
        let mut best_rnti = 0u16;
        let mut best_metric = 0.0f32;
        let mut total = 0.0f32;

        for &rnti in &rntis {
            let c_init = (((rnti as u32) << 16) + scrambling_id as u32) & 0x7FFF_FFFF;
            let scrambling = pseudo_random_sequence(e, c_init);

            let mut metric = 0.0f32;
            for i in 0..e - n {
                let a = if scrambling[i] == 1 { -llrs[i] } else { llrs[i] };
                let b = if scrambling[i + n] == 1 {
                    -llrs[i + n]
                } else {
                    llrs[i + n]
                };
                metric += (a + b).abs();
            }

            total += metric;
            if metric > best_metric {
                best_metric = metric;
                best_rnti = rnti;
            }
        }

        if rntis.is_empty() {
            return None;
        }
        let mean = total / rntis.len() as f32;
        if best_metric > REPETITION_FACTOR * mean {
            trace!("repetition heuristic picked rnti {}", best_rnti);
            Some(Rnti::new(best_rnti))
        } else {
            None
        }
    }

    /// Remove pending lower-aggregation-level candidates at the same slot
    /// and symbol whose CCE footprint lies inside the confirmed one
    fn delete_subsumed(&mut self, confirmed: &SpeculativeDci) {
        let key = (
            confirmed.scrambling_id,
            confirmed.al_index,
            confirmed.slot,
            confirmed.candidate,
        );
        let Some(confirmed_cces) = self.tables.get(&key).map(|t| t.cce_indices.clone()) else {
            return;
        };

        let tables = &self.tables;
        self.speculative.retain(|other| {
            if other.al_index >= confirmed.al_index
                || other.slot != confirmed.slot
                || other.symbol != confirmed.symbol
            {
                return true;
            }
            let other_key = (
                other.scrambling_id,
                other.al_index,
                other.slot,
                other.candidate,
            );
            match tables.get(&other_key) {
                Some(t) => !is_sorted_subset(&t.cce_indices, &confirmed_cces),
                None => true,
            }
        });
    }

    /// Precompute DMRS references and subcarrier index tables for every
    /// (scrambling id, aggregation level, slot, candidate) combination
    fn build_tables(bwp: &BandwidthPart, config: &PdcchConfig) -> HashMap<TableKey, CandidateTables> {
        let coreset = &config.coreset;
        let reg_order = reg_bundle_order(coreset);
        let num_regs = coreset.num_prbs as usize * coreset.duration;
        let mut tables = HashMap::new();

        for slot in 0..bwp.slots_per_frame {
            let yp = compute_yp(config.search_space, coreset.id, slot);

            for scrambling_id in config.scrambling_id_start..=config.scrambling_id_end {
                // Full-grid DMRS per CORESET symbol, three symbols per REG
                let full_dmrs: Vec<Vec<Complex32>> = (0..coreset.duration)
                    .map(|d| {
                        pdcch_dmrs_symbols(
                            scrambling_id,
                            slot as u32,
                            (coreset.start_symbol + d) as u32,
                            bwp.symbols_per_slot as u32,
                            3 * num_regs,
                        )
                    })
                    .collect();

                for al_index in 0..NUM_AGGREGATION_LEVELS {
                    if (1usize << al_index) > coreset.num_cces() {
                        continue;
                    }
                    for candidate in 0..coreset.num_candidates[al_index] {
                        let cce_indices = candidate_cces(coreset, yp, al_index, candidate);
                        let regs = candidate_regs(&reg_order, &cce_indices);

                        let dmrs_reference: Vec<Vec<Complex32>> = full_dmrs
                            .iter()
                            .map(|symbol_dmrs| {
                                regs.iter()
                                    .flat_map(|&r| {
                                        (0..3).map(move |k| symbol_dmrs[3 * r + k])
                                    })
                                    .collect()
                            })
                            .collect();

                        let dmrs_indices: Vec<usize> = regs
                            .iter()
                            .flat_map(|&r| DMRS_RE_OFFSETS.iter().map(move |&o| 12 * r + o))
                            .collect();
                        let data_indices: Vec<usize> = regs
                            .iter()
                            .flat_map(|&r| DATA_RE_OFFSETS.iter().map(move |&o| 12 * r + o))
                            .collect();

                        tables.insert(
                            (scrambling_id, al_index, slot, candidate),
                            CandidateTables {
                                dmrs_reference,
                                dmrs_indices,
                                data_indices,
                                cce_indices,
                            },
                        );
                    }
                }
            }
        }

        tables
    }
}

/// Key tying one equalization pass to one candidate hypothesis
fn equalization_key(key: &TableKey) -> u64 {
    ((key.0 as u64) << 32) | ((key.1 as u64) << 24) | ((key.3 as u64) << 12) | key.2 as u64
}

/// UE-specific search spaces hash the RNTI through a per-slot recursion;
/// the common search space always starts at CCE offset zero
pub fn compute_yp(search_space: SearchSpace, coreset_id: u8, slot: usize) -> u64 {
    match search_space {
        SearchSpace::Common => 0,
        SearchSpace::UeSpecific { rnti } => {
            let a = YP_CONSTANTS[coreset_id as usize % 3];
            let mut yp = rnti as u64;
            for _ in 0..=slot {
                yp = (a * yp) % 65537;
            }
            yp
        }
    }
}

/// REG-bundle interleaving pattern f: position i of the output takes bundle
/// f(i). Interleaved mapping permutes via (row * C + col + shift) mod (N/L)
/// over an R-row matrix; non-interleaved is the identity.
pub fn cce_reg_interleaving(coreset: &Coreset) -> Vec<usize> {
    let num_regs = coreset.num_prbs as usize * coreset.duration;
    let num_bundles = num_regs / coreset.reg_bundle_size;

    match coreset.mapping {
        CceToRegMapping::NonInterleaved => (0..num_bundles).collect(),
        CceToRegMapping::Interleaved => {
            let r = coreset.interleaver_size;
            let c = num_regs / (r * coreset.reg_bundle_size);
            let mut pattern = vec![0usize; num_bundles];
            for col in 0..c {
                for row in 0..r {
                    pattern[col * r + row] =
                        (row * c + col + coreset.shift_index as usize) % num_bundles;
                }
            }
            pattern
        }
    }
}

/// Map CCE-order REG positions to frequency/time REG indices. REG index
/// i + j * num_prbs denotes resource block i in CORESET symbol j.
pub fn reg_bundle_order(coreset: &Coreset) -> Vec<usize> {
    let num_prbs = coreset.num_prbs as usize;
    let mut time_first = vec![0usize; num_prbs * coreset.duration];
    for i in 0..num_prbs {
        for j in 0..coreset.duration {
            time_first[i * coreset.duration + j] = i + j * num_prbs;
        }
    }

    let bundle = coreset.reg_bundle_size;
    let mut order = Vec::with_capacity(time_first.len());
    for f in cce_reg_interleaving(coreset) {
        order.extend_from_slice(&time_first[bundle * f..bundle * (f + 1)]);
    }
    order
}

/// CCE indices assigned to one candidate (TS 38.213 Section 10.1)
pub fn candidate_cces(coreset: &Coreset, yp: u64, al_index: usize, candidate: usize) -> Vec<usize> {
    let al = 1usize << al_index;
    let num_cces = coreset.num_cces();
    let num_candidates = coreset.num_candidates[al_index].max(1);

    let base = al
        * ((yp as usize + candidate * num_cces / (al * num_candidates)) % (num_cces / al).max(1));
    (0..al).map(|i| base + i).collect()
}

/// Sorted REG indices of one candidate's CCEs
pub fn candidate_regs(reg_order: &[usize], cce_indices: &[usize]) -> Vec<usize> {
    let mut regs = Vec::with_capacity(cce_indices.len() * REGS_PER_CCE);
    for &cce in cce_indices {
        regs.extend_from_slice(&reg_order[cce * REGS_PER_CCE..(cce + 1) * REGS_PER_CCE]);
    }
    regs.sort_unstable();
    regs
}

/// Whether sorted `inner` is a subset of sorted `outer`
fn is_sorted_subset(inner: &[usize], outer: &[usize]) -> bool {
    let mut outer_iter = outer.iter();
    'next: for value in inner {
        for candidate in outer_iter.by_ref() {
            if candidate == value {
                continue 'next;
            }
            if candidate > value {
                return false;
            }
        }
        return false;
    }
    true
}


#[cfg(test)]
mod tests {
    use super::testing::{sib1_config, sib1_coreset, synthesize_sib1_symbol, test_bwp};
    use super::*;

    #[test]
    fn test_interleaving_reference_shift_160() {
        let coreset = sib1_coreset(160);
        assert_eq!(cce_reg_interleaving(&coreset), vec![0, 4, 1, 5, 2, 6, 3, 7]);
    }

    #[test]
    fn test_interleaving_reference_shift_102() {
        let coreset = sib1_coreset(102);
        assert_eq!(cce_reg_interleaving(&coreset), vec![6, 2, 7, 3, 0, 4, 1, 5]);
    }

    #[test]
    fn test_interleaving_non_interleaved_identity() {
        let coreset = Coreset::new(
            0,
            48,
            1,
            0,
            CceToRegMapping::NonInterleaved,
            6,
            2,
            102,
            [8, 4, 2, 1, 0],
        )
        .unwrap();
        assert_eq!(cce_reg_interleaving(&coreset), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_interleaving_bundle_two() {
        let coreset = Coreset::new(
            0,
            48,
            1,
            0,
            CceToRegMapping::Interleaved,
            2,
            2,
            102,
            [8, 4, 2, 1, 0],
        )
        .unwrap();
        let expected = vec![
            6, 18, 7, 19, 8, 20, 9, 21, 10, 22, 11, 23, 12, 0, 13, 1, 14, 2, 15, 3, 16, 4, 17, 5,
        ];
        assert_eq!(cce_reg_interleaving(&coreset), expected);
    }

    #[test]
    fn test_candidate_cces_cover_search_space() {
        let coreset = sib1_coreset(102);
        // Two AL4 candidates split the 8 CCEs
        assert_eq!(candidate_cces(&coreset, 0, 2, 0), vec![0, 1, 2, 3]);
        assert_eq!(candidate_cces(&coreset, 0, 2, 1), vec![4, 5, 6, 7]);
        // The single AL8 candidate takes everything
        assert_eq!(candidate_cces(&coreset, 0, 3, 0), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_yp_common_is_zero_uss_varies_per_slot() {
        assert_eq!(compute_yp(SearchSpace::Common, 1, 5), 0);
        let a = compute_yp(SearchSpace::UeSpecific { rnti: 4660 }, 1, 0);
        let b = compute_yp(SearchSpace::UeSpecific { rnti: 4660 }, 1, 1);
        assert_ne!(a, b);
        assert!(a < 65537 && b < 65537);
    }

    #[test]
    fn test_rnti_list_promote_and_idempotence() {
        let list = RntiList::new(10, 14);
        assert!(list.promote(Rnti::new(12)));
        assert_eq!(list.snapshot(usize::MAX), vec![12, 10, 11, 13, 14]);

        // Promoting the front value changes nothing
        assert!(list.promote(Rnti::new(12)));
        assert_eq!(list.snapshot(usize::MAX), vec![12, 10, 11, 13, 14]);

        // Absent values are a no-op and report not found
        assert!(!list.promote(Rnti::new(99)));
        assert_eq!(list.snapshot(usize::MAX), vec![12, 10, 11, 13, 14]);
    }

    #[test]
    fn test_rnti_list_snapshot_cap() {
        let list = RntiList::new(0, 9);
        assert_eq!(list.snapshot(3), vec![0, 1, 2]);
        assert_eq!(list.len(), 10);
    }

    #[test]
    fn test_sorted_subset() {
        assert!(is_sorted_subset(&[1, 3], &[0, 1, 2, 3, 4]));
        assert!(is_sorted_subset(&[], &[0, 1]));
        assert!(!is_sorted_subset(&[1, 5], &[0, 1, 2, 3, 4]));
        assert!(!is_sorted_subset(&[1], &[]));
    }

    #[test]
    fn test_subsumption_deletes_lower_levels_same_position_only() {
        let mut pdcch = Pdcch::new(test_bwp(), sib1_config()).unwrap();

        let speculative = |al_index: usize, candidate: usize, slot: usize| SpeculativeDci {
            scrambling_id: 102,
            al_index,
            candidate,
            slot,
            symbol: 0,
            correlation: 1.0,
        };

        // AL8 candidate 0 covers all CCEs; AL{1,2,4} at slot 0 are subsumed,
        // the same candidates at slot 1 are not
        pdcch.speculative = vec![
            speculative(0, 3, 0),
            speculative(1, 1, 0),
            speculative(2, 0, 0),
            speculative(0, 3, 1),
            speculative(2, 1, 1),
        ];
        let confirmed = speculative(3, 0, 0);
        pdcch.delete_subsumed(&confirmed);

        let remaining: Vec<(usize, usize)> = pdcch
            .speculative
            .iter()
            .map(|s| (s.al_index, s.slot))
            .collect();
        assert_eq!(remaining, vec![(0, 1), (2, 1)]);
    }

    #[test]
    fn test_end_to_end_sib1_decode() {
        let mut pdcch = Pdcch::new(test_bwp(), sib1_config()).unwrap();

        let payload: Vec<u8> = (0..39).map(|i| ((i * 7 + 3) % 5 == 0) as u8).collect();
        let mut symbol = synthesize_sib1_symbol(&pdcch, &payload, Rnti::SI);

        let dcis = pdcch.process(&mut symbol).unwrap();
        assert_eq!(dcis.len(), 1, "expected exactly one confirmed DCI");

        let dci = &dcis[0];
        assert_eq!(dci.rnti, Rnti::SI);
        assert_eq!(dci.aggregation_level, 4);
        assert_eq!(dci.candidate, 0);
        assert_eq!(dci.scrambling_id, 102);
        assert_eq!(dci.payload, payload);
        assert_eq!(dci.sample_index, 4096);
        assert!(dci.correlation > 0.99);
    }

    #[test]
    fn test_empty_symbol_yields_no_dcis() {
        let mut pdcch = Pdcch::new(test_bwp(), sib1_config()).unwrap();
        let mut symbol = Symbol::new(
            vec![Complex32::new(0.0, 0.0); pdcch.bwp.num_subcarriers],
            0,
            0,
            0,
        );
        assert!(pdcch.process(&mut symbol).unwrap().is_empty());
    }

    #[test]
    fn test_symbol_outside_coreset_is_skipped() {
        let mut pdcch = Pdcch::new(test_bwp(), sib1_config()).unwrap();
        let mut symbol = Symbol::new(
            vec![Complex32::new(1.0, 0.0); pdcch.bwp.num_subcarriers],
            5,
            0,
            0,
        );
        assert!(pdcch.process(&mut symbol).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = sib1_config();
        config.dci_sizes.clear();
        assert!(Pdcch::new(test_bwp(), config).is_err());

        let mut config = sib1_config();
        config.rnti_start = 10;
        config.rnti_end = 5;
        assert!(Pdcch::new(test_bwp(), config).is_err());

        // Payload plus CRC must fit the K-bit interleaver
        let mut config = sib1_config();
        config.dci_sizes = vec![polar::MAX_INTERLEAVED_BITS - DCI_CRC_LENGTH + 1];
        assert!(Pdcch::new(test_bwp(), config).is_err());
    }
}
