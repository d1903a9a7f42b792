//! # flowgrid-core: network topology for power-flow studies
//!
//! Provides the topology/catalog model a power-flow solve reads from, the
//! island-detection primitive, diagnostics, and the dense linear system
//! backends shared by the iterative solvers in `flowgrid-algo`.
//!
//! ## Design
//!
//! A network is an **undirected multigraph**:
//! - **Nodes** are [`Bus`]es (id, voltage base, type tag, optional prior voltage)
//! - **Edges** are [`Branch`]es carrying a tagged [`BranchKind`]: either a
//!   [`LineParams`] line with per-length impedance or a [`TransformerParams`]
//!   transformer with short-circuit impedance and tap ratio
//!
//! Parallel branches between the same pair of buses are allowed. Bus lookups go
//! through a sorted `BTreeMap`, so every traversal the solver does is in
//! ascending id order and independent of insertion order.
//!
//! ## Quick Start
//!
//! ```
//! use flowgrid_core::*;
//!
//! let mut network = Network::new();
//! network.add_bus(Bus::new(BusId::new(1), "A").with_kind(BusKind::Slack).with_base_kv(10.0)).unwrap();
//! network.add_bus(Bus::new(BusId::new(2), "B").with_base_kv(10.0)).unwrap();
//!
//! network
//!     .add_branch(Branch::line(
//!         BranchId::new(1),
//!         BusId::new(1),
//!         BusId::new(2),
//!         LineParams {
//!             r_ohm_per_km: 0.4,
//!             x_ohm_per_km: 0.8,
//!             length_km: 1.0,
//!             ..LineParams::default()
//!         },
//!     ))
//!     .unwrap();
//!
//! assert_eq!(network.stats().num_buses, 2);
//! assert_eq!(find_islands(&network).len(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`diagnostics`] - Validation findings
//! - [`graph_utils`] - Island detection over in-service branches
//! - [`solver`] - Dense LU backends (faer and a hand-rolled Gaussian fallback)
//! - [`units`] - Unit newtypes for reported quantities

use petgraph::{prelude::*, Undirected};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod solver;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{NetworkError, NetworkResult};
pub use graph_utils::{find_islands, island_containing};
pub use petgraph::graph::NodeIndex;
pub use units::{
    Degrees, Kiloamperes, Kilovolts, Megavars, MegavoltAmperes, Megawatts, PerUnit, Radians,
};

// Newtype wrappers for IDs for type safety
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BusId(usize);
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BranchId(usize);

impl BusId {
    pub const fn new(value: usize) -> Self {
        BusId(value)
    }

    pub fn value(&self) -> usize {
        self.0
    }
}

impl BranchId {
    pub const fn new(value: usize) -> Self {
        BranchId(value)
    }

    pub fn value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tag carried by the topology for a bus.
///
/// The solve input decides the actual classification; the tag is only
/// cross-checked by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Slack,
    Pv,
    #[default]
    Pq,
}

/// Prior voltage estimate used when a solve is not flat-started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageEstimate {
    pub magnitude: PerUnit,
    pub angle: Radians,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    /// Nominal line-to-line voltage. `None` when the catalog has no base.
    #[serde(default)]
    pub base_kv: Option<Kilovolts>,
    #[serde(default)]
    pub kind: BusKind,
    #[serde(default)]
    pub voltage_estimate: Option<VoltageEstimate>,
    /// Catalog lower voltage limit, used when the solve input gives none
    #[serde(default)]
    pub vmin_pu: Option<PerUnit>,
    /// Catalog upper voltage limit, used when the solve input gives none
    #[serde(default)]
    pub vmax_pu: Option<PerUnit>,
}

impl Bus {
    pub fn new(id: BusId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            base_kv: None,
            kind: BusKind::Pq,
            voltage_estimate: None,
            vmin_pu: None,
            vmax_pu: None,
        }
    }

    pub fn with_kind(mut self, kind: BusKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_base_kv(mut self, base_kv: f64) -> Self {
        self.base_kv = Some(Kilovolts(base_kv));
        self
    }

    pub fn with_estimate(mut self, magnitude_pu: f64, angle_rad: f64) -> Self {
        self.voltage_estimate = Some(VoltageEstimate {
            magnitude: PerUnit(magnitude_pu),
            angle: Radians(angle_rad),
        });
        self
    }

    pub fn with_voltage_limits(mut self, vmin_pu: f64, vmax_pu: f64) -> Self {
        self.vmin_pu = Some(PerUnit(vmin_pu));
        self.vmax_pu = Some(PerUnit(vmax_pu));
        self
    }

    /// Voltage base if it can be used for unit conversion.
    pub fn usable_base_kv(&self) -> Option<Kilovolts> {
        self.base_kv.filter(|kv| kv.is_usable_base())
    }
}

/// Overhead line or cable described per kilometre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineParams {
    pub r_ohm_per_km: f64,
    pub x_ohm_per_km: f64,
    /// Shunt conductance in microsiemens per km
    pub g_us_per_km: f64,
    /// Shunt susceptance in microsiemens per km
    pub b_us_per_km: f64,
    pub length_km: f64,
}

impl Default for LineParams {
    fn default() -> Self {
        Self {
            r_ohm_per_km: 0.0,
            x_ohm_per_km: 0.0,
            g_us_per_km: 0.0,
            b_us_per_km: 0.0,
            length_km: 1.0,
        }
    }
}

/// Two-winding transformer described by its nameplate short-circuit data.
///
/// The tap ratio sits on the `from` side of the branch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerParams {
    pub rated_mva: f64,
    /// Short-circuit voltage in percent of rated voltage
    pub vk_percent: f64,
    /// Resistive part of the short-circuit voltage in percent
    pub vkr_percent: f64,
    /// Off-nominal turns ratio (1.0 = nominal)
    pub tap_ratio: f64,
    /// Phase shift in degrees
    pub shift_deg: f64,
    /// Magnetizing conductance on the system base (zero unless modeled)
    pub g_mag_pu: f64,
    /// Magnetizing susceptance on the system base (zero unless modeled)
    pub b_mag_pu: f64,
}

impl Default for TransformerParams {
    fn default() -> Self {
        Self {
            rated_mva: 1.0,
            vk_percent: 0.0,
            vkr_percent: 0.0,
            tap_ratio: 1.0,
            shift_deg: 0.0,
            g_mag_pu: 0.0,
            b_mag_pu: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BranchKind {
    Line(LineParams),
    Transformer(TransformerParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub from_bus: BusId,
    pub to_bus: BusId,
    #[serde(default = "default_in_service")]
    pub in_service: bool,
    /// Catalog apparent power rating
    #[serde(default)]
    pub rating_mva: Option<MegavoltAmperes>,
    /// Catalog thermal current rating
    #[serde(default)]
    pub rating_ka: Option<Kiloamperes>,
    pub kind: BranchKind,
}

fn default_in_service() -> bool {
    true
}

impl Branch {
    pub fn line(id: BranchId, from_bus: BusId, to_bus: BusId, params: LineParams) -> Self {
        Self {
            id,
            name: format!("Line {}-{}", from_bus, to_bus),
            from_bus,
            to_bus,
            in_service: true,
            rating_mva: None,
            rating_ka: None,
            kind: BranchKind::Line(params),
        }
    }

    pub fn transformer(
        id: BranchId,
        from_bus: BusId,
        to_bus: BusId,
        params: TransformerParams,
    ) -> Self {
        Self {
            id,
            name: format!("Trafo {}-{}", from_bus, to_bus),
            from_bus,
            to_bus,
            in_service: true,
            rating_mva: None,
            rating_ka: None,
            kind: BranchKind::Transformer(params),
        }
    }

    pub fn out_of_service(mut self) -> Self {
        self.in_service = false;
        self
    }

    pub fn with_rating_mva(mut self, rating: f64) -> Self {
        self.rating_mva = Some(MegavoltAmperes(rating));
        self
    }

    pub fn with_rating_ka(mut self, rating: f64) -> Self {
        self.rating_ka = Some(Kiloamperes(rating));
        self
    }

    pub fn is_transformer(&self) -> bool {
        matches!(self.kind, BranchKind::Transformer(_))
    }
}

/// The network graph. Buses are nodes, branches are edges.
///
/// The model is append-only; solvers only ever see `&Network`.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub graph: Graph<Bus, Branch, Undirected>,
    bus_nodes: BTreeMap<BusId, NodeIndex>,
    branch_edges: BTreeMap<BranchId, EdgeIndex>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            graph: Graph::new_undirected(),
            bus_nodes: BTreeMap::new(),
            branch_edges: BTreeMap::new(),
        }
    }

    pub fn add_bus(&mut self, bus: Bus) -> NetworkResult<NodeIndex> {
        if self.bus_nodes.contains_key(&bus.id) {
            return Err(NetworkError::DuplicateBus(bus.id));
        }
        let id = bus.id;
        let node = self.graph.add_node(bus);
        self.bus_nodes.insert(id, node);
        Ok(node)
    }

    pub fn add_branch(&mut self, branch: Branch) -> NetworkResult<EdgeIndex> {
        if self.branch_edges.contains_key(&branch.id) {
            return Err(NetworkError::DuplicateBranch(branch.id));
        }
        if branch.from_bus == branch.to_bus {
            return Err(NetworkError::SelfLoop(branch.id));
        }
        let from = self.node_of(branch.id, branch.from_bus)?;
        let to = self.node_of(branch.id, branch.to_bus)?;
        let id = branch.id;
        let edge = self.graph.add_edge(from, to, branch);
        self.branch_edges.insert(id, edge);
        Ok(edge)
    }

    fn node_of(&self, branch: BranchId, bus: BusId) -> NetworkResult<NodeIndex> {
        self.bus_nodes
            .get(&bus)
            .copied()
            .ok_or(NetworkError::UnknownBus { branch, bus })
    }

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.bus_nodes.get(&id).map(|&node| &self.graph[node])
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branch_edges.get(&id).map(|&edge| &self.graph[edge])
    }

    pub fn bus_node(&self, id: BusId) -> Option<NodeIndex> {
        self.bus_nodes.get(&id).copied()
    }

    pub fn contains_bus(&self, id: BusId) -> bool {
        self.bus_nodes.contains_key(&id)
    }

    /// Buses in ascending id order.
    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.bus_nodes.values().map(|&node| &self.graph[node])
    }

    /// Branches in ascending id order.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branch_edges.values().map(|&edge| &self.graph[edge])
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats {
            num_buses: self.bus_nodes.len(),
            ..NetworkStats::default()
        };
        for branch in self.branches() {
            match branch.kind {
                BranchKind::Line(_) => stats.num_lines += 1,
                BranchKind::Transformer(_) => stats.num_transformers += 1,
            }
            if !branch.in_service {
                stats.num_out_of_service += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_lines: usize,
    pub num_transformers: usize,
    pub num_out_of_service: usize,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buses, {} lines, {} transformers ({} out of service)",
            self.num_buses, self.num_lines, self.num_transformers, self.num_out_of_service
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bus() -> Network {
        let mut network = Network::new();
        network
            .add_bus(Bus::new(BusId::new(2), "B").with_base_kv(10.0))
            .unwrap();
        network
            .add_bus(Bus::new(BusId::new(1), "A").with_kind(BusKind::Slack))
            .unwrap();
        network
            .add_branch(Branch::line(
                BranchId::new(1),
                BusId::new(1),
                BusId::new(2),
                LineParams::default(),
            ))
            .unwrap();
        network
    }

    #[test]
    fn test_network_creation() {
        let network = two_bus();
        assert_eq!(network.graph.node_count(), 2);
        assert_eq!(network.graph.edge_count(), 1);
        assert_eq!(network.stats().to_string(), "2 buses, 1 lines, 0 transformers (0 out of service)");
    }

    #[test]
    fn buses_iterate_in_id_order() {
        let network = two_bus();
        let ids: Vec<_> = network.buses().map(|b| b.id.value()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn rejects_duplicates_and_unknown_endpoints() {
        let mut network = two_bus();
        assert_eq!(
            network.add_bus(Bus::new(BusId::new(1), "again")),
            Err(NetworkError::DuplicateBus(BusId::new(1)))
        );
        let dangling = Branch::line(
            BranchId::new(2),
            BusId::new(1),
            BusId::new(9),
            LineParams::default(),
        );
        assert_eq!(
            network.add_branch(dangling),
            Err(NetworkError::UnknownBus {
                branch: BranchId::new(2),
                bus: BusId::new(9)
            })
        );
        let looped = Branch::line(
            BranchId::new(3),
            BusId::new(2),
            BusId::new(2),
            LineParams::default(),
        );
        assert_eq!(
            network.add_branch(looped),
            Err(NetworkError::SelfLoop(BranchId::new(3)))
        );
    }

    #[test]
    fn usable_base_filters_zero() {
        let bus = Bus::new(BusId::new(1), "x").with_base_kv(0.0);
        assert!(bus.usable_base_kv().is_none());
    }

    #[test]
    fn branch_kind_serializes_with_tag() {
        let branch = Branch::transformer(
            BranchId::new(4),
            BusId::new(1),
            BusId::new(2),
            TransformerParams::default(),
        );
        let json = serde_json::to_value(&branch).unwrap();
        assert_eq!(json["kind"]["type"], "transformer");
        let back: Branch = serde_json::from_value(json).unwrap();
        assert_eq!(back, branch);
    }
}
