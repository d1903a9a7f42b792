//! Gauss-Seidel update rule.
//!
//! One sweep per iteration, buses in index order, always using the newest
//! voltages of the buses already visited:
//!
//! ```text
//! V_i ← (conj(S_i)/conj(V_i) − Σ_{k≠i} Y_ik V_k) / Y_ii
//! V_i ← V_i_old + α (V_i_new − V_i_old)                      (SOR)
//! ```
//!
//! An active PV bus first takes `Q_i = Im(V_i · conj(Σ_k Y_ik V_k))` and is
//! checked against its reactive limits right there, inside the sweep. If it
//! stays PV only its angle moves (with the same α) and the magnitude stays at
//! the setpoint; a bus that just switched is updated as PQ with Q at the bound.

use super::injection::{Injections, Mismatch, MismatchLayout};
use super::iteration::{SolveContext, SolverState, StepReport, UpdateRule};
use super::options::Method;
use super::q_limits::BusClass;
use flowgrid_core::solver::LinearSolveError;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Diagonal admittances below this magnitude make the sweep undefined.
const MIN_SELF_ADMITTANCE: f64 = 1e-12;

#[derive(Debug, Default, Clone, Copy)]
pub struct GaussSeidel;

impl UpdateRule for GaussSeidel {
    fn method(&self) -> Method {
        Method::GaussSeidel
    }

    fn prepare(
        &mut self,
        ctx: &SolveContext<'_>,
        state: &SolverState,
    ) -> Result<(), LinearSolveError> {
        let ybus = ctx.ybus();
        let isolated = (0..ybus.n_bus())
            .filter(|&i| !state.classes.class(i).is_slack())
            .any(|i| ybus.y(i, i).norm() < MIN_SELF_ADMITTANCE);
        if isolated {
            return Err(LinearSolveError::Singular);
        }
        Ok(())
    }

    fn step(
        &mut self,
        ctx: &SolveContext<'_>,
        state: &mut SolverState,
        _injections: &Injections,
        _mismatch: &Mismatch,
        _layout: &MismatchLayout,
        iteration: usize,
    ) -> Result<StepReport, LinearSolveError> {
        let ybus = ctx.ybus();
        let enforce = ctx.options.enforce_q_limits;
        let alpha = ctx.options.acceleration;
        let mut v = state.voltages.phasors();
        let mut step_sq = 0.0;

        for i in 0..ybus.n_bus() {
            let class = state.classes.class(i);
            if class.is_slack() {
                continue;
            }

            let mut y_ii = Complex64::new(0.0, 0.0);
            let mut coupled = Complex64::new(0.0, 0.0);
            for (k, y) in ybus.row(i) {
                if k == i {
                    y_ii = y;
                } else {
                    coupled += y * v[k];
                }
            }
            if y_ii.norm() < MIN_SELF_ADMITTANCE {
                return Err(LinearSolveError::Singular);
            }

            let old = v[i];
            let q_calc = (old * (coupled + y_ii * old).conj()).im;
            let switched = class == BusClass::PvActive
                && enforce
                && state.enforce_bus_limit(i, iteration, q_calc, ybus, ctx.base_mva);
            let holds_voltage = class == BusClass::PvActive && !switched;
            let new = if holds_voltage {
                let s = Complex64::new(state.spec.p[i], q_calc);
                let estimate = (s.conj() / old.conj() - coupled) / y_ii;
                let delta = wrap_angle(estimate.arg() - old.arg());
                Complex64::from_polar(old.norm(), old.arg() + alpha * delta)
            } else {
                let s = Complex64::new(state.spec.p[i], state.spec.q[i]);
                let estimate = (s.conj() / old.conj() - coupled) / y_ii;
                old + (estimate - old) * alpha
            };

            step_sq += (new - old).norm_sqr();
            v[i] = new;
        }

        for (i, phasor) in v.into_iter().enumerate() {
            if !state.classes.class(i).is_slack() {
                state.voltages.set_phasor(i, phasor);
            }
        }

        Ok(StepReport {
            step_norm: step_sq.sqrt(),
            damping: alpha,
        })
    }
}

/// Map an angle difference into (−π, π].
fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}
