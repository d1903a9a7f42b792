//! Shared iteration driver.
//!
//! Every method runs through [`run`]:
//!
//! ```text
//! INIT ──prepare──▶ ITERATING ──max|ΔS| < tol──────────▶ CONVERGED
//!                      │    ╰──iteration == max_iter───▶ NOT_CONVERGED (max_iter)
//!                      │    ╰──non-finite mismatch─────▶ NOT_CONVERGED (diverged)
//!                      ╰──linear solve failed──────────▶ ABORTED (singular_jacobian)
//! ```
//!
//! The driver owns mismatch evaluation, the reactive-limit pass and the
//! iteration records. Methods only differ in their [`UpdateRule`]. A rule
//! that switches buses during its own step (Gauss-Seidel) records the events
//! on the state; the driver collects them and triggers the same rebuild.

use super::injection::{
    compute_injections, compute_mismatch, Injections, Mismatch, MismatchLayout, SpecifiedPower,
    VoltageState,
};
use super::input::SolveInput;
use super::options::{Method, SolveOptions, TraceLevel};
use super::q_limits::{BusClass, BusClassification, SwitchEvent};
use crate::sparse::{AdmittanceModel, SparseYBus};
use flowgrid_core::solver::{LinearSolveError, LinearSystemBackend};
use flowgrid_core::{BusId, Network};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveOutcome {
    Converged,
    NotConverged,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    #[serde(rename = "max_iter")]
    MaxIterations,
    #[serde(rename = "singular_jacobian")]
    SingularJacobian,
    #[serde(rename = "diverged")]
    Diverged,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::MaxIterations => "max_iter",
            FailureCause::SingularJacobian => "singular_jacobian",
            FailureCause::Diverged => "diverged",
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-bus state at the start of an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSnapshot {
    pub bus: BusId,
    pub vm_pu: f64,
    pub va_rad: f64,
    pub p_pu: f64,
    pub q_pu: f64,
    pub class: BusClass,
}

/// One mismatch evaluation and the step taken from it.
///
/// `iteration` counts the steps already taken, so the record of a converged
/// solve has `iteration == iterations` and a zero step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub max_mismatch: f64,
    pub mismatch_norm: f64,
    pub step_norm: f64,
    pub damping: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Vec<BusSnapshot>>,
}

/// What a method reports about the step it just applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step_norm: f64,
    pub damping: f64,
}

/// Read-only data shared by the driver and the update rule.
pub struct SolveContext<'a> {
    pub model: &'a AdmittanceModel,
    pub options: &'a SolveOptions,
    pub backend: Arc<dyn LinearSystemBackend>,
    pub base_mva: f64,
}

impl SolveContext<'_> {
    pub fn ybus(&self) -> &SparseYBus {
        &self.model.ybus
    }
}

/// Mutable solve state: voltages, classification, specified power.
#[derive(Debug, Clone)]
pub struct SolverState {
    pub voltages: VoltageState,
    pub classes: BusClassification,
    pub spec: SpecifiedPower,
    switched: Vec<SwitchEvent>,
    slack_vm: f64,
    slack_va: f64,
}

impl SolverState {
    /// Initial iterate: flat start, or the topology's prior estimates where
    /// present. Slack and PV magnitudes are pinned either way.
    pub fn initial(network: &Network, model: &AdmittanceModel, input: &SolveInput) -> Self {
        let ybus = &model.ybus;
        let n = ybus.n_bus();
        let slack_idx = ybus.bus_index(input.slack.bus).unwrap_or(0);

        let mut voltages = VoltageState::flat(n);
        if !input.options.flat_start {
            for (i, &id) in ybus.bus_ids().iter().enumerate() {
                if let Some(estimate) = network.bus(id).and_then(|bus| bus.voltage_estimate) {
                    if estimate.magnitude.value() > 0.0 && estimate.angle.value().is_finite() {
                        voltages.vm[i] = estimate.magnitude.value();
                        voltages.va[i] = estimate.angle.value();
                    }
                }
            }
        }

        let mut state = Self {
            voltages,
            classes: BusClassification::from_input(input, ybus, slack_idx),
            spec: SpecifiedPower::from_input(input, ybus),
            switched: Vec::new(),
            slack_vm: input.slack.vm_pu,
            slack_va: input.slack.va_rad,
        };
        state.pin_controlled();
        state
    }

    /// Re-assert the slack voltage and the magnitudes of active PV buses.
    pub fn pin_controlled(&mut self) {
        let slack = self.classes.slack_idx();
        if slack < self.voltages.len() {
            self.voltages.vm[slack] = self.slack_vm;
            self.voltages.va[slack] = self.slack_va;
        }
        let setpoints: Vec<(usize, f64)> = self
            .classes
            .active_pv()
            .map(|(i, control)| (i, control.vm_setpoint))
            .collect();
        for (i, vm) in setpoints {
            self.voltages.vm[i] = vm;
        }
    }

    /// Reactive-limit check for bus `i` from inside an update step.
    pub fn enforce_bus_limit(
        &mut self,
        i: usize,
        iteration: usize,
        q_calc: f64,
        ybus: &SparseYBus,
        base_mva: f64,
    ) -> bool {
        let event = self
            .classes
            .enforce_bus_limit(i, iteration, q_calc, &mut self.spec, ybus, base_mva);
        match event {
            Some(event) => {
                self.switched.push(event);
                true
            }
            None => false,
        }
    }

    fn take_switches(&mut self) -> Vec<SwitchEvent> {
        std::mem::take(&mut self.switched)
    }

    pub(crate) fn snapshot(&self, ybus: &SparseYBus, injections: &Injections) -> Vec<BusSnapshot> {
        ybus.bus_ids()
            .iter()
            .enumerate()
            .map(|(i, &bus)| BusSnapshot {
                bus,
                vm_pu: self.voltages.vm[i],
                va_rad: self.voltages.va[i],
                p_pu: injections.p[i],
                q_pu: injections.q[i],
                class: self.classes.class(i),
            })
            .collect()
    }
}

/// The part of a method that differs between Newton-Raphson, Gauss-Seidel
/// and Fast-Decoupled.
pub trait UpdateRule {
    fn method(&self) -> Method;

    /// Build whatever the method keeps across iterations.
    fn prepare(&mut self, ctx: &SolveContext<'_>, state: &SolverState)
        -> Result<(), LinearSolveError>;

    /// Called once after a reactive-limit pass switched at least one bus.
    fn on_reclassify(
        &mut self,
        ctx: &SolveContext<'_>,
        state: &SolverState,
    ) -> Result<(), LinearSolveError> {
        self.prepare(ctx, state)
    }

    /// Apply one update to `state.voltages`.
    fn step(
        &mut self,
        ctx: &SolveContext<'_>,
        state: &mut SolverState,
        injections: &Injections,
        mismatch: &Mismatch,
        layout: &MismatchLayout,
        iteration: usize,
    ) -> Result<StepReport, LinearSolveError>;
}

/// Everything the driver hands back to the result assembler.
#[derive(Debug, Clone)]
pub struct DriverOutput {
    pub outcome: SolveOutcome,
    pub failure: Option<FailureCause>,
    pub iterations: usize,
    pub final_mismatch: f64,
    pub records: Vec<IterationRecord>,
    pub switches: Vec<SwitchEvent>,
    pub state: SolverState,
    pub injections: Injections,
}

struct Recorder {
    level: TraceLevel,
    records: Vec<IterationRecord>,
}

impl Recorder {
    fn push(
        &mut self,
        iteration: usize,
        mismatch: &Mismatch,
        step: Option<StepReport>,
        failure: Option<FailureCause>,
        snapshot: Option<Vec<BusSnapshot>>,
    ) {
        let step = step.unwrap_or(StepReport {
            step_norm: 0.0,
            damping: 0.0,
        });
        self.records.push(IterationRecord {
            iteration,
            max_mismatch: mismatch.max_abs,
            mismatch_norm: mismatch.norm2,
            step_norm: step.step_norm,
            damping: step.damping,
            failure,
            snapshot,
        });
    }

    fn finish(mut self) -> Vec<IterationRecord> {
        if self.level == TraceLevel::Summary {
            let last = self.records.pop();
            self.records = last.into_iter().collect();
        }
        self.records
    }
}

/// Run `rule` from `state` until convergence, exhaustion or failure.
pub fn run(
    rule: &mut dyn UpdateRule,
    ctx: &SolveContext<'_>,
    mut state: SolverState,
) -> DriverOutput {
    let ybus = ctx.ybus();
    let options = ctx.options;
    let tolerance = options.tolerance;
    let max_iterations = options.max_iterations();
    // Zero activation checks limits on every iteration
    let limits_due = |max_mismatch: f64| {
        options.enforce_q_limits
            && (options.q_limit_activation == 0.0
                || max_mismatch < options.q_limit_activation.max(tolerance))
    };
    let full = options.trace == TraceLevel::Full;

    let mut recorder = Recorder {
        level: options.trace,
        records: Vec::new(),
    };
    let mut switches = Vec::new();

    if let Err(err) = rule.prepare(ctx, &state) {
        warn!(method = %rule.method(), error = %err, "initial factorization failed");
        let injections = compute_injections(ybus, &state.voltages);
        let mismatch = compute_mismatch(&state.spec, &injections, &state.classes.layout());
        let failure = Some(FailureCause::SingularJacobian);
        let snapshot = full.then(|| state.snapshot(ybus, &injections));
        recorder.push(0, &mismatch, None, failure, snapshot);
        return DriverOutput {
            outcome: SolveOutcome::Aborted,
            failure,
            iterations: 0,
            final_mismatch: mismatch.max_abs,
            records: recorder.finish(),
            switches,
            state,
            injections,
        };
    }

    let mut iteration = 0;
    let (outcome, failure, mismatch, injections) = loop {
        let injections = compute_injections(ybus, &state.voltages);
        let mut layout = state.classes.layout();
        let mut mismatch = compute_mismatch(&state.spec, &injections, &layout);
        let snapshot = full.then(|| state.snapshot(ybus, &injections));

        if !mismatch.is_finite() {
            warn!(method = %rule.method(), iteration, "mismatch is no longer finite");
            let failure = Some(FailureCause::Diverged);
            recorder.push(iteration, &mismatch, None, failure, snapshot);
            break (SolveOutcome::NotConverged, failure, mismatch, injections);
        }

        if limits_due(mismatch.max_abs) {
            let events = state.classes.enforce_q_limits(
                iteration,
                &injections.q,
                &mut state.spec,
                ybus,
                ctx.base_mva,
            );
            if !events.is_empty() {
                switches.extend(events);
                layout = state.classes.layout();
                mismatch = compute_mismatch(&state.spec, &injections, &layout);
                if let Err(err) = rule.on_reclassify(ctx, &state) {
                    warn!(method = %rule.method(), error = %err, "rebuild after PV→PQ switch failed");
                    let failure = Some(FailureCause::SingularJacobian);
                    recorder.push(iteration, &mismatch, None, failure, snapshot);
                    break (SolveOutcome::Aborted, failure, mismatch, injections);
                }
            }
        }

        if mismatch.max_abs < tolerance {
            recorder.push(iteration, &mismatch, None, None, snapshot);
            break (SolveOutcome::Converged, None, mismatch, injections);
        }

        if iteration >= max_iterations {
            let failure = Some(FailureCause::MaxIterations);
            recorder.push(iteration, &mismatch, None, failure, snapshot);
            break (SolveOutcome::NotConverged, failure, mismatch, injections);
        }

        match rule.step(ctx, &mut state, &injections, &mismatch, &layout, iteration) {
            Ok(report) => {
                debug!(
                    method = %rule.method(),
                    iteration,
                    max_mismatch = mismatch.max_abs,
                    step_norm = report.step_norm,
                    "iteration"
                );
                recorder.push(iteration, &mismatch, Some(report), None, snapshot);
            }
            Err(err) => {
                warn!(method = %rule.method(), iteration, error = %err, "linear solve failed");
                switches.extend(state.take_switches());
                let failure = Some(FailureCause::SingularJacobian);
                recorder.push(iteration, &mismatch, None, failure, snapshot);
                break (SolveOutcome::Aborted, failure, mismatch, injections);
            }
        }

        let inline = state.take_switches();
        if !inline.is_empty() {
            switches.extend(inline);
            if let Err(err) = rule.on_reclassify(ctx, &state) {
                warn!(method = %rule.method(), error = %err, "rebuild after PV→PQ switch failed");
                state.pin_controlled();
                iteration += 1;
                let failure = Some(FailureCause::SingularJacobian);
                let injections = compute_injections(ybus, &state.voltages);
                let mismatch = compute_mismatch(&state.spec, &injections, &state.classes.layout());
                let snapshot = full.then(|| state.snapshot(ybus, &injections));
                recorder.push(iteration, &mismatch, None, failure, snapshot);
                break (SolveOutcome::Aborted, failure, mismatch, injections);
            }
        }

        state.pin_controlled();
        iteration += 1;
    };

    DriverOutput {
        outcome,
        failure,
        iterations: iteration,
        final_mismatch: mismatch.max_abs,
        records: recorder.finish(),
        switches,
        state,
        injections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_flow::options::SolveOptions;
    use crate::sparse::AdmittanceBuilder;
    use flowgrid_core::{Branch, BranchId, Bus, LineParams};

    /// Moves every non-slack angle by a fixed amount and never converges.
    struct Drift {
        prepared: usize,
    }

    impl UpdateRule for Drift {
        fn method(&self) -> Method {
            Method::NewtonRaphson
        }

        fn prepare(
            &mut self,
            _ctx: &SolveContext<'_>,
            _state: &SolverState,
        ) -> Result<(), LinearSolveError> {
            self.prepared += 1;
            Ok(())
        }

        fn step(
            &mut self,
            _ctx: &SolveContext<'_>,
            state: &mut SolverState,
            _injections: &Injections,
            _mismatch: &Mismatch,
            layout: &MismatchLayout,
            _iteration: usize,
        ) -> Result<StepReport, LinearSolveError> {
            for &i in &layout.p_rows {
                state.voltages.va[i] -= 0.001;
            }
            // Try to move the slack; the driver must undo it
            state.voltages.vm[0] = 0.5;
            Ok(StepReport {
                step_norm: 0.001,
                damping: 1.0,
            })
        }
    }

    struct Broken;

    impl UpdateRule for Broken {
        fn method(&self) -> Method {
            Method::FastDecoupled
        }

        fn prepare(
            &mut self,
            _ctx: &SolveContext<'_>,
            _state: &SolverState,
        ) -> Result<(), LinearSolveError> {
            Err(LinearSolveError::Singular)
        }

        fn step(
            &mut self,
            _ctx: &SolveContext<'_>,
            _state: &mut SolverState,
            _injections: &Injections,
            _mismatch: &Mismatch,
            _layout: &MismatchLayout,
            _iteration: usize,
        ) -> Result<StepReport, LinearSolveError> {
            unreachable!("prepare failed")
        }
    }

    fn setup(options: SolveOptions) -> (Network, SolveInput, AdmittanceModel) {
        let mut network = Network::new();
        for id in 1..=2 {
            network
                .add_bus(Bus::new(BusId::new(id), format!("B{id}")).with_base_kv(10.0))
                .unwrap();
        }
        network
            .add_branch(Branch::line(
                BranchId::new(1),
                BusId::new(1),
                BusId::new(2),
                LineParams {
                    r_ohm_per_km: 0.4,
                    x_ohm_per_km: 0.8,
                    ..LineParams::default()
                },
            ))
            .unwrap();
        let input = SolveInput::new(10.0, BusId::new(1))
            .with_load(BusId::new(2), 2.0, 1.0)
            .with_options(options);
        let model = AdmittanceBuilder::new(&network, BusId::new(1), 10.0)
            .build()
            .unwrap();
        (network, input, model)
    }

    fn run_rule(rule: &mut dyn UpdateRule, options: SolveOptions) -> DriverOutput {
        let (network, input, model) = setup(options);
        let ctx = SolveContext {
            model: &model,
            options: &input.options,
            backend: input.options.linear_solver.build_solver(),
            base_mva: input.base_mva,
        };
        let state = SolverState::initial(&network, &model, &input);
        run(rule, &ctx, state)
    }

    #[test]
    fn exhaustion_reports_max_iter() {
        let mut rule = Drift { prepared: 0 };
        let out = run_rule(&mut rule, SolveOptions::default().with_max_iterations(5));
        assert_eq!(out.outcome, SolveOutcome::NotConverged);
        assert_eq!(out.failure, Some(FailureCause::MaxIterations));
        assert_eq!(out.iterations, 5);
        assert_eq!(out.records.len(), 6);
        assert_eq!(out.records[5].failure, Some(FailureCause::MaxIterations));
        assert_eq!(rule.prepared, 1);
        // Slack re-pinned after every step
        assert_eq!(out.state.voltages.vm[0], 1.0);
    }

    #[test]
    fn summary_trace_keeps_last_record() {
        let mut rule = Drift { prepared: 0 };
        let options = SolveOptions::default()
            .with_max_iterations(3)
            .with_trace(TraceLevel::Summary);
        let out = run_rule(&mut rule, options);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].iteration, 3);
        assert!(out.records[0].snapshot.is_none());
    }

    #[test]
    fn full_trace_carries_snapshots() {
        let mut rule = Drift { prepared: 0 };
        let options = SolveOptions::default()
            .with_max_iterations(2)
            .with_trace(TraceLevel::Full);
        let out = run_rule(&mut rule, options);
        for record in &out.records {
            let snapshot = record.snapshot.as_ref().expect("snapshot at full trace");
            assert_eq!(snapshot.len(), 2);
            assert_eq!(snapshot[0].class, BusClass::Slack);
        }
    }

    #[test]
    fn failed_prepare_aborts_before_iterating() {
        let out = run_rule(&mut Broken, SolveOptions::default());
        assert_eq!(out.outcome, SolveOutcome::Aborted);
        assert_eq!(out.failure, Some(FailureCause::SingularJacobian));
        assert_eq!(out.iterations, 0);
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn cause_names_match_result_schema() {
        assert_eq!(
            serde_json::to_string(&FailureCause::MaxIterations).unwrap(),
            "\"max_iter\""
        );
        assert_eq!(FailureCause::SingularJacobian.to_string(), "singular_jacobian");
    }
}
