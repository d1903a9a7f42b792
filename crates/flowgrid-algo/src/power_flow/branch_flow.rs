//! Branch flows, losses, engineering units and limit violations.
//!
//! Runs on the final voltages of any solve, converged or not. Flows are
//! computed from the same [`BranchStamp`]s the Y-bus was assembled from:
//!
//! ```text
//! I_f = Y_ff V_f + Y_ft V_t        S_f = V_f conj(I_f)
//! I_t = Y_tf V_f + Y_tt V_t        S_t = V_t conj(I_t)
//! loss = S_f + S_t
//! ```
//!
//! Quantities are converted with each bus's own voltage base. Buses without
//! a usable base keep their per-unit values and are listed as unconverted.

use super::injection::{Injections, VoltageState};
use super::input::SolveInput;
use super::q_limits::{BusClass, BusClassification};
use crate::sparse::{AdmittanceModel, BranchStamp, StampKind};
use flowgrid_core::units::{
    Degrees, Kiloamperes, Kilovolts, MegavoltAmperes, Megavars, Megawatts, PerUnit, Radians,
};
use flowgrid_core::{BranchId, BusId, Network};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final state of one solved bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResult {
    pub bus: BusId,
    pub name: String,
    pub vm_pu: f64,
    pub va_rad: f64,
    pub va_deg: Degrees,
    /// `None` when the bus has no usable voltage base
    pub vm_kv: Option<Kilovolts>,
    /// Calculated net injection
    pub p_mw: Megawatts,
    pub q_mvar: Megavars,
    pub class: BusClass,
}

/// Flow through one branch, measured into the branch at each terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFlow {
    pub branch: BranchId,
    pub kind: StampKind,
    pub from_bus: BusId,
    pub to_bus: BusId,
    pub p_from_mw: Megawatts,
    pub q_from_mvar: Megavars,
    pub p_to_mw: Megawatts,
    pub q_to_mvar: Megavars,
    pub s_from_mva: MegavoltAmperes,
    pub s_to_mva: MegavoltAmperes,
    pub i_from_pu: f64,
    pub i_to_pu: f64,
    pub i_from_ka: Option<Kiloamperes>,
    pub i_to_ka: Option<Kiloamperes>,
    pub loss_p_mw: Megawatts,
    pub loss_q_mvar: Megavars,
    /// Highest of MVA and current loading against the effective limits
    pub loading_percent: Option<f64>,
}

impl BranchFlow {
    pub fn max_mva(&self) -> MegavoltAmperes {
        MegavoltAmperes(self.s_from_mva.value().max(self.s_to_mva.value()))
    }

    pub fn max_ka(&self) -> Option<Kiloamperes> {
        match (self.i_from_ka, self.i_to_ka) {
            (Some(a), Some(b)) => Some(Kiloamperes(a.value().max(b.value()))),
            (a, b) => a.or(b),
        }
    }
}

/// Network element a finding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum ElementRef {
    Bus(BusId),
    Branch(BranchId),
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementRef::Bus(id) => write!(f, "bus {id}"),
            ElementRef::Branch(id) => write!(f, "branch {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Undervoltage,
    Overvoltage,
    BranchMva,
    BranchCurrent,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Undervoltage => "undervoltage",
            ViolationKind::Overvoltage => "overvoltage",
            ViolationKind::BranchMva => "branch_mva",
            ViolationKind::BranchCurrent => "branch_current",
        }
    }
}

/// A quantity beyond its limit.
///
/// `severity > 1` always means beyond the limit: `value/limit` for upper
/// bounds, `limit/value` for undervoltage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub element: ElementRef,
    /// pu for voltages, MVA or kA for branches
    pub value: f64,
    pub limit: f64,
    pub severity: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub count: usize,
    pub by_kind: BTreeMap<ViolationKind, usize>,
    /// Worst violations first
    pub top: Vec<Violation>,
}

/// A value left in per-unit for lack of a voltage base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnconvertedEntry {
    pub element: ElementRef,
    pub quantity: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessed {
    pub buses: Vec<BusResult>,
    pub branches: Vec<BranchFlow>,
    /// Sum of from and to terminal power over all branches (pu)
    pub losses: Complex64,
    pub violations: Vec<Violation>,
    pub unconverted: Vec<UnconvertedEntry>,
}

/// Sort worst first: severity descending, then kind, then element id.
pub fn sort_violations(violations: &mut [Violation]) {
    violations.sort_by(|a, b| {
        b.severity
            .total_cmp(&a.severity)
            .then(a.kind.cmp(&b.kind))
            .then(a.element.cmp(&b.element))
    });
}

pub fn summarize(violations: &[Violation], top_n: usize) -> ViolationSummary {
    let mut by_kind = BTreeMap::new();
    for violation in violations {
        *by_kind.entry(violation.kind).or_insert(0) += 1;
    }
    ViolationSummary {
        count: violations.len(),
        by_kind,
        top: violations.iter().take(top_n).cloned().collect(),
    }
}

struct FlowContext<'a> {
    network: &'a Network,
    input: &'a SolveInput,
    base_mva: f64,
    phasors: Vec<Complex64>,
    bases: Vec<Option<Kilovolts>>,
}

impl FlowContext<'_> {
    fn to_ka(&self, idx: usize, current_pu: f64) -> Option<Kiloamperes> {
        self.bases[idx].map(|kv| kv.base_current(self.base_mva) * current_pu)
    }

    fn branch_flow(&self, stamp: &BranchStamp, unconverted: &mut Vec<UnconvertedEntry>) -> (BranchFlow, Complex64) {
        let v_from = self.phasors[stamp.from_idx];
        let v_to = self.phasors[stamp.to_idx];
        let (i_from, i_to) = stamp.terminal_currents(v_from, v_to);
        let s_from = v_from * i_from.conj();
        let s_to = v_to * i_to.conj();
        let loss = s_from + s_to;
        let base = self.base_mva;

        let i_from_ka = self.to_ka(stamp.from_idx, i_from.norm());
        let i_to_ka = self.to_ka(stamp.to_idx, i_to.norm());
        for (side, bus, converted) in [
            ("from", stamp.from_bus, i_from_ka.is_some()),
            ("to", stamp.to_bus, i_to_ka.is_some()),
        ] {
            if !converted {
                unconverted.push(UnconvertedEntry {
                    element: ElementRef::Branch(stamp.branch),
                    quantity: format!("current_{side}_ka"),
                    reason: format!("bus {bus} has no usable voltage base"),
                });
            }
        }

        let mut flow = BranchFlow {
            branch: stamp.branch,
            kind: stamp.kind,
            from_bus: stamp.from_bus,
            to_bus: stamp.to_bus,
            p_from_mw: Megawatts(s_from.re * base),
            q_from_mvar: Megavars(s_from.im * base),
            p_to_mw: Megawatts(s_to.re * base),
            q_to_mvar: Megavars(s_to.im * base),
            s_from_mva: MegavoltAmperes(s_from.norm() * base),
            s_to_mva: MegavoltAmperes(s_to.norm() * base),
            i_from_pu: i_from.norm(),
            i_to_pu: i_to.norm(),
            i_from_ka,
            i_to_ka,
            loss_p_mw: Megawatts(loss.re * base),
            loss_q_mvar: Megavars(loss.im * base),
            loading_percent: None,
        };
        flow.loading_percent = self.loading(&flow);
        (flow, loss)
    }

    /// Explicit branch limits override catalog ratings field by field.
    fn branch_limits(&self, branch: BranchId) -> (Option<f64>, Option<f64>) {
        let catalog = self.network.branch(branch);
        let explicit = self.input.branch_limits.iter().find(|l| l.branch == branch);
        let mva = explicit
            .and_then(|l| l.max_mva)
            .or_else(|| catalog.and_then(|b| b.rating_mva).map(|r| r.value()));
        let ka = explicit
            .and_then(|l| l.max_ka)
            .or_else(|| catalog.and_then(|b| b.rating_ka).map(|r| r.value()));
        (mva, ka)
    }

    fn loading(&self, flow: &BranchFlow) -> Option<f64> {
        let (max_mva, max_ka) = self.branch_limits(flow.branch);
        let by_mva = max_mva
            .filter(|limit| *limit > 0.0)
            .map(|limit| flow.max_mva().value() / limit);
        let by_ka = max_ka
            .filter(|limit| *limit > 0.0)
            .zip(flow.max_ka())
            .map(|(limit, ka)| ka.value() / limit);
        match (by_mva, by_ka) {
            (Some(a), Some(b)) => Some(a.max(b) * 100.0),
            (a, b) => a.or(b).map(|ratio| ratio * 100.0),
        }
    }

    fn voltage_limits(&self, bus: BusId) -> (Option<f64>, Option<f64>) {
        if let Some(limit) = self.input.voltage_limits.iter().find(|l| l.bus == bus) {
            return (Some(limit.vmin_pu), Some(limit.vmax_pu));
        }
        let catalog = self.network.bus(bus);
        (
            catalog.and_then(|b| b.vmin_pu).map(PerUnit::value),
            catalog.and_then(|b| b.vmax_pu).map(PerUnit::value),
        )
    }
}

/// Bus results, branch flows, losses and violations for the final iterate.
pub fn post_process(
    network: &Network,
    model: &AdmittanceModel,
    input: &SolveInput,
    voltages: &VoltageState,
    injections: &Injections,
    classes: &BusClassification,
) -> PostProcessed {
    let ybus = &model.ybus;
    let base_mva = input.base_mva;
    let ctx = FlowContext {
        network,
        input,
        base_mva,
        phasors: voltages.phasors(),
        bases: ybus
            .bus_ids()
            .iter()
            .map(|&id| network.bus(id).and_then(|bus| bus.usable_base_kv()))
            .collect(),
    };

    let mut unconverted = Vec::new();
    let mut violations = Vec::new();

    let mut buses = Vec::with_capacity(ybus.n_bus());
    for (i, &id) in ybus.bus_ids().iter().enumerate() {
        let vm = voltages.vm[i];
        let vm_kv = ctx.bases[i].map(|kv| PerUnit(vm).to_kilovolts(kv));
        if vm_kv.is_none() {
            unconverted.push(UnconvertedEntry {
                element: ElementRef::Bus(id),
                quantity: "voltage_kv".to_string(),
                reason: "no usable voltage base".to_string(),
            });
        }

        let (vmin, vmax) = ctx.voltage_limits(id);
        if let Some(vmin) = vmin.filter(|&limit| vm < limit) {
            violations.push(Violation {
                kind: ViolationKind::Undervoltage,
                element: ElementRef::Bus(id),
                value: vm,
                limit: vmin,
                severity: if vm > 0.0 { vmin / vm } else { f64::INFINITY },
            });
        }
        if let Some(vmax) = vmax.filter(|&limit| vm > limit) {
            violations.push(Violation {
                kind: ViolationKind::Overvoltage,
                element: ElementRef::Bus(id),
                value: vm,
                limit: vmax,
                severity: vm / vmax,
            });
        }

        buses.push(BusResult {
            bus: id,
            name: network.bus(id).map(|b| b.name.clone()).unwrap_or_default(),
            vm_pu: vm,
            va_rad: voltages.va[i],
            va_deg: Radians(voltages.va[i]).to_degrees(),
            vm_kv,
            p_mw: Megawatts(injections.p[i] * base_mva),
            q_mvar: Megavars(injections.q[i] * base_mva),
            class: classes.class(i),
        });
    }

    let mut branches = Vec::with_capacity(model.stamps().len());
    let mut losses = Complex64::new(0.0, 0.0);
    for stamp in model.stamps() {
        let (flow, loss) = ctx.branch_flow(stamp, &mut unconverted);
        losses += loss;

        let (max_mva, max_ka) = ctx.branch_limits(stamp.branch);
        let element = ElementRef::Branch(stamp.branch);
        if let Some(limit) = max_mva.filter(|&l| l > 0.0 && flow.max_mva().value() > l) {
            let value = flow.max_mva().value();
            violations.push(Violation {
                kind: ViolationKind::BranchMva,
                element,
                value,
                limit,
                severity: value / limit,
            });
        }
        if let (Some(limit), Some(ka)) = (max_ka.filter(|&l| l > 0.0), flow.max_ka()) {
            if ka.value() > limit {
                violations.push(Violation {
                    kind: ViolationKind::BranchCurrent,
                    element,
                    value: ka.value(),
                    limit,
                    severity: ka.value() / limit,
                });
            }
        }
        branches.push(flow);
    }

    sort_violations(&mut violations);

    PostProcessed {
        buses,
        branches,
        losses,
        violations,
        unconverted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_flow::solve;
    use crate::test_utils::{line, radial_feeder, two_bus_case};
    use flowgrid_core::{Branch, Bus};

    #[test]
    fn two_bus_flow_direction_and_loss() {
        let (network, input) = two_bus_case();
        let result = solve(&network, &input).unwrap();
        let flow = &result.branches[0];

        // Power leaves A and arrives at B slightly reduced
        assert!(flow.p_from_mw.value() > 2.0);
        assert!((flow.p_to_mw.value() + 2.0).abs() < 1e-4);
        assert!((flow.q_to_mvar.value() + 1.0).abs() < 1e-4);
        assert!(flow.loss_p_mw.value() > 0.0);
        // I = S/(√3 V): roughly 0.13 kA at 10 kV for 2.24 MVA
        let ka = flow.i_from_ka.unwrap().value();
        assert!(ka > 0.12 && ka < 0.14, "current {ka} kA");
        assert!((result.losses_mw.value() - flow.loss_p_mw.value()).abs() < 1e-12);
    }

    #[test]
    fn violations_sorted_by_severity() {
        let (network, input) = two_bus_case();
        let input = input
            .with_voltage_limit(BusId::new(2), 0.999, 1.05)
            .with_branch_limit(BranchId::new(1), Some(1.0), None);
        let result = solve(&network, &input).unwrap();

        let kinds: Vec<ViolationKind> = result.violations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::BranchMva, ViolationKind::Undervoltage]);
        assert!(result.violations[0].severity > 2.0);
        let under = &result.violations[1];
        assert!((under.severity - 0.999 / under.value).abs() < 1e-12);
        assert!(under.severity > 1.0);
        assert_eq!(result.violation_summary.count, 2);
        assert_eq!(result.violation_summary.by_kind[&ViolationKind::Undervoltage], 1);
    }

    #[test]
    fn catalog_ratings_apply_without_explicit_limits() {
        let mut network = Network::new();
        network
            .add_bus(Bus::new(BusId::new(1), "A").with_base_kv(10.0))
            .unwrap();
        network
            .add_bus(
                Bus::new(BusId::new(2), "B")
                    .with_base_kv(10.0)
                    .with_voltage_limits(0.9, 1.1),
            )
            .unwrap();
        network
            .add_branch(
                Branch::line(BranchId::new(1), BusId::new(1), BusId::new(2), line(0.4, 0.8, 1.0))
                    .with_rating_ka(0.1),
            )
            .unwrap();
        let input = SolveInput::new(10.0, BusId::new(1)).with_load(BusId::new(2), 2.0, 1.0);
        let result = solve(&network, &input).unwrap();

        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::BranchCurrent);
        assert!(result.branches[0].loading_percent.unwrap() > 100.0);
    }

    #[test]
    fn missing_base_is_listed_as_unconverted() {
        let mut network = radial_feeder(2, line(0.4, 0.8, 1.0), 10.0);
        network.add_bus(Bus::new(BusId::new(3), "NoBase")).unwrap();
        network
            .add_branch(Branch::line(
                BranchId::new(2),
                BusId::new(2),
                BusId::new(3),
                line(0.4, 0.8, 1.0),
            ))
            .unwrap();
        let input = SolveInput::new(10.0, BusId::new(1)).with_load(BusId::new(3), 1.0, 0.0);
        let result = solve(&network, &input).unwrap();

        assert!(result.buses[2].vm_kv.is_none());
        assert!(result.branches[1].i_to_ka.is_none());
        assert!(result.branches[1].i_from_ka.is_some());
        let elements: Vec<ElementRef> = result.unconverted.iter().map(|u| u.element).collect();
        assert_eq!(
            elements,
            vec![ElementRef::Bus(BusId::new(3)), ElementRef::Branch(BranchId::new(2))]
        );
    }

    #[test]
    fn summary_truncates_to_top_n() {
        let mut violations: Vec<Violation> = (1..=4)
            .map(|i| Violation {
                kind: ViolationKind::Overvoltage,
                element: ElementRef::Bus(BusId::new(i)),
                value: 1.0 + i as f64 / 100.0,
                limit: 1.0,
                severity: 1.0 + i as f64 / 100.0,
            })
            .collect();
        sort_violations(&mut violations);
        let summary = summarize(&violations, 2);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.top.len(), 2);
        assert_eq!(summary.top[0].element, ElementRef::Bus(BusId::new(4)));
    }
}
