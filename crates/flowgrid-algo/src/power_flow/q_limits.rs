//! Bus classification and reactive-limit enforcement (PV→PQ switching).
//!
//! Every solved bus carries a [`BusClass`]. The only transition allowed
//! during a solve is `PvActive → PvSwitched`:
//!
//! ```text
//!   Slack ──────────────────────────────── (fixed for the whole solve)
//!   Pq    ──────────────────────────────── (fixed for the whole solve)
//!   PvActive ──Q outside [Qmin, Qmax]──▶ PvSwitched { side }
//! ```
//!
//! A switched bus behaves like a PQ bus whose generator reactive output is
//! pinned to the violated bound. [`BusClassification::enforce_q_limits`] is a
//! dedicated pass over all active PV buses in index order: every violator of
//! that pass is switched before the caller rebuilds anything.

use super::injection::{MismatchLayout, SpecifiedPower};
use super::input::SolveInput;
use crate::sparse::SparseYBus;
use flowgrid_core::BusId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Generator Q must exceed a bound by more than this (pu) to switch.
const LIMIT_EPS: f64 = 1e-9;

/// Which reactive bound a switched bus hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitDirection {
    /// Generator Q fell below Qmin
    Under,
    /// Generator Q rose above Qmax
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "class")]
pub enum BusClass {
    Slack,
    Pq,
    PvActive,
    PvSwitched { direction: LimitDirection },
}

impl BusClass {
    /// Buses that contribute a ΔQ row and a |V| unknown.
    pub fn is_pq_like(&self) -> bool {
        matches!(self, BusClass::Pq | BusClass::PvSwitched { .. })
    }

    pub fn is_slack(&self) -> bool {
        matches!(self, BusClass::Slack)
    }

    /// The single legal transition; any other class is returned unchanged.
    fn switch(self, direction: LimitDirection) -> Self {
        match self {
            BusClass::PvActive => BusClass::PvSwitched { direction },
            other => other,
        }
    }
}

/// Voltage control data for a PV bus (pu).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PvControl {
    pub vm_setpoint: f64,
    pub q_min: Option<f64>,
    pub q_max: Option<f64>,
}

/// One PV→PQ transition, as logged in the result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwitchEvent {
    pub iteration: usize,
    pub bus: BusId,
    /// Generator reactive output when the violation was detected
    pub q_mvar: f64,
    /// The violated bound, now the fixed generator output
    pub limit_mvar: f64,
    pub direction: LimitDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusClassification {
    classes: Vec<BusClass>,
    controls: Vec<Option<PvControl>>,
    slack_idx: usize,
}

impl BusClassification {
    /// Classify every bus of the Y-bus: the slack first, then PV specs, the
    /// rest PQ. PV specs on the slack bus are ignored.
    pub fn from_input(input: &SolveInput, ybus: &SparseYBus, slack_idx: usize) -> Self {
        let n = ybus.n_bus();
        let base = input.base_mva;
        let mut classes = vec![BusClass::Pq; n];
        let mut controls: Vec<Option<PvControl>> = vec![None; n];
        classes[slack_idx] = BusClass::Slack;

        for gen in &input.pv {
            let Some(i) = ybus.bus_index(gen.bus) else {
                continue;
            };
            if i == slack_idx {
                continue;
            }
            let q_min = gen.q_min_mvar.map(|q| q / base);
            let q_max = gen.q_max_mvar.map(|q| q / base);
            controls[i] = Some(match controls[i] {
                // Duplicate specs on one bus: first setpoint wins, limits add up
                Some(existing) => PvControl {
                    vm_setpoint: existing.vm_setpoint,
                    q_min: merge_limit(existing.q_min, q_min),
                    q_max: merge_limit(existing.q_max, q_max),
                },
                None => PvControl {
                    vm_setpoint: gen.vm_pu,
                    q_min,
                    q_max,
                },
            });
            classes[i] = BusClass::PvActive;
        }

        Self {
            classes,
            controls,
            slack_idx,
        }
    }

    pub fn class(&self, i: usize) -> BusClass {
        self.classes[i]
    }

    pub fn classes(&self) -> &[BusClass] {
        &self.classes
    }

    pub fn control(&self, i: usize) -> Option<&PvControl> {
        self.controls[i].as_ref()
    }

    pub fn slack_idx(&self) -> usize {
        self.slack_idx
    }

    /// Indices currently holding their voltage magnitude.
    pub fn active_pv(&self) -> impl Iterator<Item = (usize, &PvControl)> + '_ {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, class)| matches!(class, BusClass::PvActive))
            .filter_map(|(i, _)| self.controls[i].as_ref().map(|c| (i, c)))
    }

    pub fn layout(&self) -> MismatchLayout {
        let mut layout = MismatchLayout::default();
        for (i, class) in self.classes.iter().enumerate() {
            if !class.is_slack() {
                layout.p_rows.push(i);
            }
            if class.is_pq_like() {
                layout.q_rows.push(i);
            }
        }
        layout
    }

    /// Check every active PV bus against its reactive limits.
    ///
    /// `q_calc` is the calculated net injection per bus (pu). Violators are
    /// switched, their specified Q is fixed to `limit + local demand`, and
    /// the returned events are in index order.
    pub fn enforce_q_limits(
        &mut self,
        iteration: usize,
        q_calc: &[f64],
        spec: &mut SpecifiedPower,
        ybus: &SparseYBus,
        base_mva: f64,
    ) -> Vec<SwitchEvent> {
        let candidates: Vec<usize> = self.active_pv().map(|(i, _)| i).collect();
        candidates
            .into_iter()
            .filter_map(|i| self.enforce_bus_limit(i, iteration, q_calc[i], spec, ybus, base_mva))
            .collect()
    }

    /// Check one bus given its calculated net injection `q_calc` (pu).
    ///
    /// Only an active PV bus can switch. Gauss-Seidel calls this inside its
    /// sweep, the driver through [`enforce_q_limits`](Self::enforce_q_limits).
    pub fn enforce_bus_limit(
        &mut self,
        i: usize,
        iteration: usize,
        q_calc: f64,
        spec: &mut SpecifiedPower,
        ybus: &SparseYBus,
        base_mva: f64,
    ) -> Option<SwitchEvent> {
        if self.classes[i] != BusClass::PvActive {
            return None;
        }
        let control = self.controls[i]?;
        let q_gen = q_calc - spec.local_q[i];
        let (limit, direction) = match (control.q_min, control.q_max) {
            (_, Some(q_max)) if q_gen > q_max + LIMIT_EPS => (q_max, LimitDirection::Over),
            (Some(q_min), _) if q_gen < q_min - LIMIT_EPS => (q_min, LimitDirection::Under),
            _ => return None,
        };

        self.classes[i] = self.classes[i].switch(direction);
        spec.q[i] = limit + spec.local_q[i];

        let bus = ybus.bus_ids()[i];
        warn!(
            bus = %bus,
            iteration,
            q_mvar = q_gen * base_mva,
            limit_mvar = limit * base_mva,
            ?direction,
            "PV bus switched to PQ at reactive limit"
        );
        Some(SwitchEvent {
            iteration,
            bus,
            q_mvar: q_gen * base_mva,
            limit_mvar: limit * base_mva,
            direction,
        })
    }
}

/// Limits of two generators on one bus add up; a missing bound does not
/// remove the other generator's.
fn merge_limit(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}
