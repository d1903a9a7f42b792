//! The frozen result of one solve.
//!
//! [`SolveResult`] carries the final numbers together with a [`SolveTrace`]
//! holding every option and intermediate decision, so a reader can re-derive
//! the numbers without running the solve again.

use super::branch_flow::{
    summarize, BranchFlow, BusResult, PostProcessed, UnconvertedEntry, Violation,
    ViolationSummary,
};
use super::injection::{Injections, SpecifiedPower};
use super::input::SolveInput;
use super::iteration::{BusSnapshot, DriverOutput, FailureCause, IterationRecord, SolveOutcome};
use super::options::Method;
use super::q_limits::{BusClass, BusClassification, SwitchEvent};
use crate::sparse::{AdmittanceModel, AppliedShunt, AppliedTap, IslandReport, YbusTrace};
use flowgrid_core::diagnostics::Diagnostics;
use flowgrid_core::solver::LinearSolverKind;
use flowgrid_core::units::{Megavars, Megawatts};
use flowgrid_core::BusId;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Power delivered by the slack generator, net of local demand at the slack bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlackPower {
    pub bus: BusId,
    pub p_mw: Megawatts,
    pub q_mvar: Megavars,
}

/// Global balance: Σ net injections − branch losses − bus shunt consumption.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerBalance {
    pub p_residual_mw: f64,
    pub q_residual_mvar: f64,
    /// `n_bus · tolerance`, in MW/Mvar
    pub tolerance_mw: f64,
    pub passed: bool,
}

/// Everything needed to audit a [`SolveResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveTrace {
    /// The input as solved, options included
    pub input: SolveInput,
    pub validation: Diagnostics,
    pub island: IslandReport,
    pub ybus: YbusTrace,
    pub applied_taps: Vec<AppliedTap>,
    pub applied_shunts: Vec<AppliedShunt>,
    pub linear_solver: LinearSolverKind,
    pub initial_state: Vec<BusSnapshot>,
    pub iterations: Vec<IterationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub outcome: SolveOutcome,
    pub converged: bool,
    pub failure: Option<FailureCause>,
    pub method: Method,
    /// Update steps taken
    pub iterations: usize,
    pub tolerance: f64,
    /// Infinity norm of the last evaluated mismatch (pu)
    pub final_mismatch: f64,
    pub base_mva: f64,
    pub buses: Vec<BusResult>,
    pub branches: Vec<BranchFlow>,
    pub losses_mw: Megawatts,
    pub losses_mvar: Megavars,
    pub slack: SlackPower,
    pub power_balance: PowerBalance,
    /// Worst first
    pub violations: Vec<Violation>,
    pub violation_summary: ViolationSummary,
    pub switches: Vec<SwitchEvent>,
    pub unconverted: Vec<UnconvertedEntry>,
    pub trace: SolveTrace,
}

impl SolveResult {
    pub fn bus(&self, id: BusId) -> Option<&BusResult> {
        self.buses.iter().find(|bus| bus.bus == id)
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// Net injection of bus `i` as the balance sees it: solved quantities where
/// the solve decides them, specified ones elsewhere.
fn balance_injection(
    class: BusClass,
    i: usize,
    spec: &SpecifiedPower,
    injections: &Injections,
) -> Complex64 {
    match class {
        BusClass::Slack => injections.apparent(i),
        BusClass::PvActive => Complex64::new(spec.p[i], injections.q[i]),
        BusClass::Pq | BusClass::PvSwitched { .. } => Complex64::new(spec.p[i], spec.q[i]),
    }
}

fn power_balance(
    model: &AdmittanceModel,
    driver: &DriverOutput,
    losses: Complex64,
    tolerance: f64,
    base_mva: f64,
) -> PowerBalance {
    let state = &driver.state;
    let classes: &BusClassification = &state.classes;
    let n = model.ybus.n_bus();

    let mut residual = Complex64::new(0.0, 0.0);
    for i in 0..n {
        residual += balance_injection(classes.class(i), i, &state.spec, &driver.injections);
    }
    residual -= losses;
    for (i, y) in model.bus_shunts().iter().enumerate() {
        let vm = state.voltages.vm[i];
        residual -= vm * vm * y.conj();
    }

    let p_residual_mw = residual.re * base_mva;
    let q_residual_mvar = residual.im * base_mva;
    let tolerance_mw = n as f64 * tolerance * base_mva + 1e-9;
    PowerBalance {
        p_residual_mw,
        q_residual_mvar,
        tolerance_mw,
        passed: p_residual_mw.abs() <= tolerance_mw && q_residual_mvar.abs() <= tolerance_mw,
    }
}

fn slack_power(model: &AdmittanceModel, input: &SolveInput, driver: &DriverOutput) -> SlackPower {
    let slack = driver.state.classes.slack_idx();
    let spec = &driver.state.spec;
    let (p, q) = match model.ybus.bus_index(input.slack.bus) {
        Some(i) if i == slack => {
            let s = driver.injections.apparent(i);
            (s.re - spec.local_p[i], s.im - spec.local_q[i])
        }
        _ => (0.0, 0.0),
    };
    SlackPower {
        bus: input.slack.bus,
        p_mw: Megawatts(p * input.base_mva),
        q_mvar: Megavars(q * input.base_mva),
    }
}

/// Everything the result is built from.
pub struct ResultParts<'a> {
    pub input: &'a SolveInput,
    pub validation: Diagnostics,
    pub model: AdmittanceModel,
    pub initial_state: Vec<BusSnapshot>,
    pub driver: DriverOutput,
    pub post: PostProcessed,
}

/// Combine driver output, post-processing and trace into one result.
pub fn assemble(parts: ResultParts<'_>) -> SolveResult {
    let ResultParts {
        input,
        validation,
        model,
        initial_state,
        driver,
        post,
    } = parts;
    let options = &input.options;
    let base_mva = input.base_mva;

    let power_balance = power_balance(&model, &driver, post.losses, options.tolerance, base_mva);
    let slack = slack_power(&model, input, &driver);
    let violation_summary = summarize(&post.violations, options.violation_top_n);

    SolveResult {
        outcome: driver.outcome,
        converged: driver.outcome == SolveOutcome::Converged,
        failure: driver.failure,
        method: options.method,
        iterations: driver.iterations,
        tolerance: options.tolerance,
        final_mismatch: driver.final_mismatch,
        base_mva,
        buses: post.buses,
        branches: post.branches,
        losses_mw: Megawatts(post.losses.re * base_mva),
        losses_mvar: Megavars(post.losses.im * base_mva),
        slack,
        power_balance,
        violations: post.violations,
        violation_summary,
        switches: driver.switches,
        unconverted: post.unconverted,
        trace: SolveTrace {
            input: input.clone(),
            validation,
            island: model.island,
            ybus: model.trace,
            applied_taps: model.applied_taps,
            applied_shunts: model.applied_shunts,
            linear_solver: options.linear_solver,
            initial_state,
            iterations: driver.records,
        },
    }
}
