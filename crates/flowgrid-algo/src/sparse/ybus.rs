//! Sparse Y-bus (admittance) matrix over the slack island.
//!
//! The Y-bus is the complex nodal admittance matrix used by every solver:
//! ```text
//! I = Y × V
//!
//! where Y[i,j] = G[i,j] + jB[i,j] (conductance + j×susceptance)
//! ```
//!
//! [`AdmittanceBuilder`] selects the island holding the slack bus, converts
//! every in-service branch inside it to a per-unit pi model ([`BranchStamp`]),
//! stamps those into CSR storage and records each decision in a [`YbusTrace`].
//! The stamps are kept so that branch flows and the Fast-Decoupled matrices
//! are derived from exactly the same admittances as the Y-bus.
//!
//! ## Per-unit conversion
//!
//! - Lines: `Z = (r + jx)·len` ohms, divided by `Z_base = V_slack² / S_base`.
//!   Shunt admittance `(g + jb)·len` (µS) is multiplied by `Z_base` and split
//!   evenly between both ends. When the slack bus has no usable voltage base
//!   the ohmic values are taken as per-unit and the trace carries a note.
//! - Transformers: `z = vk% / 100 · S_base / S_rated`, `r = vkr% / 100 · S_base / S_rated`,
//!   tap `t = ratio·e^{jφ}` on the from side, no shunt unless a magnetizing
//!   admittance is given.

use crate::power_flow::input::{ShuntSpec, TapOverride};
use flowgrid_core::{island_containing, BranchId, BranchKind, BusId, Network};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Series impedances below this magnitude are treated as zero.
const ZERO_IMPEDANCE: f64 = 1e-12;

/// Errors from Y-bus construction
#[derive(Debug, Error, Clone, PartialEq)]
pub enum YBusError {
    #[error("slack bus {0} is not present in the network")]
    SlackNotFound(BusId),

    #[error("base MVA must be positive and finite (got {0})")]
    InvalidBaseMva(f64),
}

/// Sparse Y-bus matrix in CSR format.
///
/// Stores G (conductance) and B (susceptance) matrices separately for
/// efficient access to real and imaginary parts. Complex rows are cached
/// once at assembly for the solvers' inner loops.
#[derive(Debug, Clone)]
pub struct SparseYBus {
    n_bus: usize,
    g_matrix: CsMat<f64>,
    b_matrix: CsMat<f64>,
    rows: Vec<Vec<(usize, Complex64)>>,
    bus_map: BTreeMap<BusId, usize>,
    idx_to_bus: Vec<BusId>,
}

impl SparseYBus {
    fn assemble(
        idx_to_bus: Vec<BusId>,
        stamps: &[BranchStamp],
        bus_shunts: &[Complex64],
    ) -> Self {
        let n_bus = idx_to_bus.len();
        let bus_map = idx_to_bus
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut g_triplet = TriMat::new((n_bus, n_bus));
        let mut b_triplet = TriMat::new((n_bus, n_bus));
        let mut add = |row: usize, col: usize, y: Complex64| {
            g_triplet.add_triplet(row, col, y.re);
            b_triplet.add_triplet(row, col, y.im);
        };

        for stamp in stamps {
            let (f, t) = (stamp.from_idx, stamp.to_idx);
            add(f, f, stamp.y_ff());
            add(t, t, stamp.y_tt());
            add(f, t, stamp.y_ft());
            add(t, f, stamp.y_tf());
        }
        for (i, &y) in bus_shunts.iter().enumerate() {
            if y != Complex64::new(0.0, 0.0) {
                add(i, i, y);
            }
        }

        let g_matrix: CsMat<f64> = g_triplet.to_csr();
        let b_matrix: CsMat<f64> = b_triplet.to_csr();

        let mut merged: Vec<BTreeMap<usize, Complex64>> = vec![BTreeMap::new(); n_bus];
        for (i, row) in g_matrix.outer_iterator().enumerate() {
            for (j, &g) in row.iter() {
                merged[i].entry(j).or_insert_with(Complex64::default).re += g;
            }
        }
        for (i, row) in b_matrix.outer_iterator().enumerate() {
            for (j, &b) in row.iter() {
                merged[i].entry(j).or_insert_with(Complex64::default).im += b;
            }
        }
        let rows = merged
            .into_iter()
            .map(|row| row.into_iter().collect())
            .collect();

        Self {
            n_bus,
            g_matrix,
            b_matrix,
            rows,
            bus_map,
            idx_to_bus,
        }
    }

    /// Number of buses
    pub fn n_bus(&self) -> usize {
        self.n_bus
    }

    /// Get G[i,j] (conductance)
    pub fn g(&self, i: usize, j: usize) -> f64 {
        self.g_matrix.get(i, j).copied().unwrap_or(0.0)
    }

    /// Get B[i,j] (susceptance)
    pub fn b(&self, i: usize, j: usize) -> f64 {
        self.b_matrix.get(i, j).copied().unwrap_or(0.0)
    }

    /// Get complex Y[i,j] = G[i,j] + jB[i,j]
    pub fn y(&self, i: usize, j: usize) -> Complex64 {
        Complex64::new(self.g(i, j), self.b(i, j))
    }

    pub fn bus_index(&self, id: BusId) -> Option<usize> {
        self.bus_map.get(&id).copied()
    }

    pub fn bus_id(&self, idx: usize) -> Option<BusId> {
        self.idx_to_bus.get(idx).copied()
    }

    /// Bus ids in index order (ascending id).
    pub fn bus_ids(&self) -> &[BusId] {
        &self.idx_to_bus
    }

    /// Number of structurally non-zero complex entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Row i of Y as complex entries, column-ascending.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, Complex64)> + '_ {
        self.rows[i].iter().copied()
    }

    /// Injected currents I = Y·V.
    pub fn mul_vec(&self, v: &[Complex64]) -> Vec<Complex64> {
        (0..self.n_bus)
            .map(|i| self.row(i).map(|(j, y)| y * v[j]).sum())
            .collect()
    }

    /// Every stored entry in row-major order.
    pub fn entries(&self) -> Vec<YbusEntry> {
        (0..self.n_bus)
            .flat_map(|i| {
                self.row(i).map(move |(j, y)| YbusEntry {
                    row: i,
                    col: j,
                    y,
                })
            })
            .collect()
    }
}

/// One stored Y-bus entry, for the full trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YbusEntry {
    pub row: usize,
    pub col: usize,
    pub y: Complex64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StampKind {
    Line,
    Transformer,
}

/// Per-unit pi model of one branch as stamped into the Y-bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchStamp {
    pub branch: BranchId,
    pub kind: StampKind,
    pub from_bus: BusId,
    pub to_bus: BusId,
    pub from_idx: usize,
    pub to_idx: usize,
    /// Series impedance (pu)
    pub z_series: Complex64,
    /// Series admittance 1/z (pu)
    pub y_series: Complex64,
    /// Shunt admittance at the from end, before tap scaling (pu)
    pub y_shunt_from: Complex64,
    /// Shunt admittance at the to end (pu)
    pub y_shunt_to: Complex64,
    pub tap_ratio: f64,
    pub shift_rad: f64,
}

impl BranchStamp {
    /// Complex tap t = ratio·e^{jφ}
    pub fn tap(&self) -> Complex64 {
        Complex64::from_polar(self.tap_ratio, self.shift_rad)
    }

    pub fn y_ff(&self) -> Complex64 {
        (self.y_series + self.y_shunt_from) / (self.tap_ratio * self.tap_ratio)
    }

    pub fn y_tt(&self) -> Complex64 {
        self.y_series + self.y_shunt_to
    }

    pub fn y_ft(&self) -> Complex64 {
        -self.y_series / self.tap().conj()
    }

    pub fn y_tf(&self) -> Complex64 {
        -self.y_series / self.tap()
    }

    /// Currents flowing into the branch at its from and to terminals.
    pub fn terminal_currents(&self, v_from: Complex64, v_to: Complex64) -> (Complex64, Complex64) {
        (
            self.y_ff() * v_from + self.y_ft() * v_to,
            self.y_tf() * v_from + self.y_tt() * v_to,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapSource {
    Catalog,
    Override,
}

/// A transformer tap that entered the Y-bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppliedTap {
    pub branch: BranchId,
    pub ratio: f64,
    pub shift_deg: f64,
    pub source: TapSource,
}

/// A bus shunt that entered the Y-bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppliedShunt {
    pub bus: BusId,
    pub g_mw: f64,
    pub b_mvar: f64,
    pub y_pu: Complex64,
}

/// An element left out of the Y-bus, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedElement {
    pub element: String,
    pub reason: String,
}

/// Which buses are solved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IslandReport {
    pub slack: Option<BusId>,
    /// Buses in the slack island, ascending
    pub solved: Vec<BusId>,
    /// Buses outside the slack island, ascending
    pub not_solved: Vec<BusId>,
}

/// Audit record of Y-bus construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YbusTrace {
    pub base_mva: f64,
    pub slack_base_kv: Option<f64>,
    /// Impedance base for lines; `None` when the per-unit fallback is active
    pub z_base_ohm: Option<f64>,
    pub per_unit_fallback: bool,
    /// Matrix index → bus id
    pub index: Vec<BusId>,
    pub stamps: Vec<BranchStamp>,
    /// Total bus shunt admittance per index (pu)
    pub bus_shunts: Vec<Complex64>,
    pub skipped: Vec<SkippedElement>,
    pub notes: Vec<String>,
    pub nnz: usize,
    /// All stored entries; only filled at full trace verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<YbusEntry>>,
}

/// Everything the solvers and the post-processor need from setup.
#[derive(Debug, Clone)]
pub struct AdmittanceModel {
    pub ybus: SparseYBus,
    pub island: IslandReport,
    pub trace: YbusTrace,
    pub applied_taps: Vec<AppliedTap>,
    pub applied_shunts: Vec<AppliedShunt>,
}

impl AdmittanceModel {
    pub fn stamps(&self) -> &[BranchStamp] {
        &self.trace.stamps
    }

    pub fn bus_shunts(&self) -> &[Complex64] {
        &self.trace.bus_shunts
    }
}

/// Builds the per-unit Y-bus for the island containing the slack bus.
pub struct AdmittanceBuilder<'a> {
    network: &'a Network,
    slack: BusId,
    base_mva: f64,
    shunts: &'a [ShuntSpec],
    taps: &'a [TapOverride],
}

impl<'a> AdmittanceBuilder<'a> {
    pub fn new(network: &'a Network, slack: BusId, base_mva: f64) -> Self {
        Self {
            network,
            slack,
            base_mva,
            shunts: &[],
            taps: &[],
        }
    }

    pub fn with_shunts(mut self, shunts: &'a [ShuntSpec]) -> Self {
        self.shunts = shunts;
        self
    }

    pub fn with_taps(mut self, taps: &'a [TapOverride]) -> Self {
        self.taps = taps;
        self
    }

    pub fn build(self) -> Result<AdmittanceModel, YBusError> {
        if !(self.base_mva.is_finite() && self.base_mva > 0.0) {
            return Err(YBusError::InvalidBaseMva(self.base_mva));
        }
        let island: BTreeSet<BusId> = island_containing(self.network, self.slack)
            .filter(|island| !island.is_empty())
            .ok_or(YBusError::SlackNotFound(self.slack))?;

        let idx_to_bus: Vec<BusId> = island.iter().copied().collect();
        let index: BTreeMap<BusId, usize> = idx_to_bus
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let not_solved: Vec<BusId> = self
            .network
            .buses()
            .map(|bus| bus.id)
            .filter(|id| !island.contains(id))
            .collect();

        let mut skipped = Vec::new();
        let mut notes = Vec::new();

        let slack_base_kv = self
            .network
            .bus(self.slack)
            .and_then(|bus| bus.usable_base_kv());
        let z_base_ohm = slack_base_kv.map(|kv| kv.base_impedance_ohm(self.base_mva));
        if z_base_ohm.is_none() {
            warn!(slack = %self.slack, "no usable slack voltage base; line impedances taken as per-unit");
            notes.push(format!(
                "slack bus {} has no usable voltage base; line impedances and admittances are used as per-unit values",
                self.slack
            ));
        }

        let overrides: BTreeMap<BranchId, f64> =
            self.taps.iter().map(|t| (t.branch, t.ratio)).collect();
        let mut applied_taps = Vec::new();
        let mut stamps = Vec::new();

        for branch in self.network.branches() {
            let endpoints = (index.get(&branch.from_bus), index.get(&branch.to_bus));
            let (Some(&from_idx), Some(&to_idx)) = endpoints else {
                continue;
            };
            if !branch.in_service {
                continue;
            }

            let (kind, z_series, y_shunt_total, tap_ratio, shift_rad) = match &branch.kind {
                BranchKind::Line(line) => {
                    let z_ohm = Complex64::new(
                        line.r_ohm_per_km * line.length_km,
                        line.x_ohm_per_km * line.length_km,
                    );
                    let y_siemens = Complex64::new(
                        line.g_us_per_km * 1e-6 * line.length_km,
                        line.b_us_per_km * 1e-6 * line.length_km,
                    );
                    let (z, y) = match z_base_ohm {
                        Some(z_base) => (z_ohm / z_base, y_siemens * z_base),
                        None => (z_ohm, y_siemens),
                    };
                    (StampKind::Line, z, y, 1.0, 0.0)
                }
                BranchKind::Transformer(tx) => {
                    if !(tx.rated_mva.is_finite() && tx.rated_mva > 0.0) {
                        skipped.push(SkippedElement {
                            element: format!("branch {}", branch.id),
                            reason: format!("transformer rated power {} MVA is not positive", tx.rated_mva),
                        });
                        continue;
                    }
                    let scale = self.base_mva / tx.rated_mva;
                    let z_mag = tx.vk_percent / 100.0 * scale;
                    let r = tx.vkr_percent / 100.0 * scale;
                    let x = (z_mag * z_mag - r * r).max(0.0).sqrt();

                    let (ratio, source) = match overrides.get(&branch.id) {
                        Some(&ratio) => (ratio, TapSource::Override),
                        None => (tx.tap_ratio, TapSource::Catalog),
                    };
                    let ratio = if ratio.is_finite() && ratio > 0.0 {
                        ratio
                    } else {
                        notes.push(format!(
                            "branch {} tap ratio {} is not positive; nominal ratio 1.0 used",
                            branch.id, ratio
                        ));
                        1.0
                    };
                    applied_taps.push(AppliedTap {
                        branch: branch.id,
                        ratio,
                        shift_deg: tx.shift_deg,
                        source,
                    });
                    (
                        StampKind::Transformer,
                        Complex64::new(r, x),
                        Complex64::new(tx.g_mag_pu, tx.b_mag_pu),
                        ratio,
                        tx.shift_deg.to_radians(),
                    )
                }
            };

            if z_series.norm() < ZERO_IMPEDANCE || !z_series.norm().is_finite() {
                warn!(branch = %branch.id, "zero series impedance; branch left out of the Y-bus");
                skipped.push(SkippedElement {
                    element: format!("branch {}", branch.id),
                    reason: "zero series impedance".to_string(),
                });
                continue;
            }

            let stamp = BranchStamp {
                branch: branch.id,
                kind,
                from_bus: branch.from_bus,
                to_bus: branch.to_bus,
                from_idx,
                to_idx,
                z_series,
                y_series: z_series.inv(),
                y_shunt_from: y_shunt_total / 2.0,
                y_shunt_to: y_shunt_total / 2.0,
                tap_ratio,
                shift_rad,
            };
            trace!(branch = %branch.id, y = %stamp.y_series, "stamped branch");
            stamps.push(stamp);
        }

        for tap in self.taps {
            if !applied_taps.iter().any(|a| a.branch == tap.branch) {
                skipped.push(SkippedElement {
                    element: format!("tap override on branch {}", tap.branch),
                    reason: "branch is not an in-service transformer in the slack island".to_string(),
                });
            }
        }

        let mut bus_shunts = vec![Complex64::new(0.0, 0.0); idx_to_bus.len()];
        let mut applied_shunts = Vec::new();
        for shunt in self.shunts {
            match index.get(&shunt.bus) {
                Some(&i) => {
                    let y_pu = Complex64::new(shunt.g_mw, shunt.b_mvar) / self.base_mva;
                    bus_shunts[i] += y_pu;
                    applied_shunts.push(AppliedShunt {
                        bus: shunt.bus,
                        g_mw: shunt.g_mw,
                        b_mvar: shunt.b_mvar,
                        y_pu,
                    });
                }
                None => skipped.push(SkippedElement {
                    element: format!("shunt at bus {}", shunt.bus),
                    reason: "bus is not in the slack island".to_string(),
                }),
            }
        }

        let ybus = SparseYBus::assemble(idx_to_bus.clone(), &stamps, &bus_shunts);
        debug!(
            buses = ybus.n_bus(),
            branches = stamps.len(),
            nnz = ybus.nnz(),
            not_solved = not_solved.len(),
            "assembled Y-bus"
        );

        Ok(AdmittanceModel {
            island: IslandReport {
                slack: Some(self.slack),
                solved: idx_to_bus.clone(),
                not_solved,
            },
            trace: YbusTrace {
                base_mva: self.base_mva,
                slack_base_kv: slack_base_kv.map(|kv| kv.value()),
                z_base_ohm,
                per_unit_fallback: z_base_ohm.is_none(),
                index: idx_to_bus,
                stamps,
                bus_shunts,
                skipped,
                notes,
                nnz: ybus.nnz(),
                entries: None,
            },
            ybus,
            applied_taps,
            applied_shunts,
        })
    }
}
