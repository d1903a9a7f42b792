//! Newton-Raphson update rule.
//!
//! Solves the polar-form power balance
//!
//! ```text
//! P_i = Σ_k V_i V_k (G_ik cos θ_ik + B_ik sin θ_ik)
//! Q_i = Σ_k V_i V_k (G_ik sin θ_ik − B_ik cos θ_ik)
//! ```
//!
//! by linearizing around the current iterate:
//!
//! ```text
//! ┌ ΔP ┐   ┌ H  N ┐ ┌ Δθ   ┐        H = ∂P/∂θ   N = ∂P/∂|V|
//! │    │ = │      │ │      │        M = ∂Q/∂θ   L = ∂Q/∂|V|
//! └ ΔQ ┘   └ M  L ┘ └ Δ|V| ┘
//! ```
//!
//! Rows and columns follow the [`MismatchLayout`]: θ for every non-slack bus,
//! |V| for PQ-classified buses only. The step is scaled by
//! [`SolveOptions::damping`](super::options::SolveOptions::damping).

use super::injection::{Injections, Mismatch, MismatchLayout, VoltageState};
use super::iteration::{SolveContext, SolverState, StepReport, UpdateRule};
use super::options::Method;
use crate::sparse::SparseYBus;
use flowgrid_core::solver::LinearSolveError;

/// Build the dense Jacobian `[[H, N], [M, L]]` for `layout`.
///
/// Only Y-bus non-zeros are visited; diagonal terms use the calculated
/// injections instead of re-summing each row.
pub fn build_jacobian(
    ybus: &SparseYBus,
    voltages: &VoltageState,
    injections: &Injections,
    layout: &MismatchLayout,
) -> Vec<Vec<f64>> {
    let n = ybus.n_bus();
    let n_p = layout.p_rows.len();
    let dim = layout.len();

    let mut pos_p = vec![None; n];
    let mut pos_q = vec![None; n];
    for (k, &i) in layout.p_rows.iter().enumerate() {
        pos_p[i] = Some(k);
    }
    for (k, &i) in layout.q_rows.iter().enumerate() {
        pos_q[i] = Some(k);
    }

    let vm = &voltages.vm;
    let va = &voltages.va;
    let mut jacobian = vec![vec![0.0; dim]; dim];

    // H and N rows (ΔP)
    for (row, &i) in layout.p_rows.iter().enumerate() {
        for (j, y) in ybus.row(i) {
            let (g, b) = (y.re, y.im);
            if j == i {
                if let Some(col) = pos_p[i] {
                    jacobian[row][col] = -injections.q[i] - b * vm[i] * vm[i];
                }
                if let Some(col) = pos_q[i] {
                    jacobian[row][n_p + col] = injections.p[i] / vm[i] + g * vm[i];
                }
                continue;
            }
            let (sin, cos) = (va[i] - va[j]).sin_cos();
            if let Some(col) = pos_p[j] {
                jacobian[row][col] = vm[i] * vm[j] * (g * sin - b * cos);
            }
            if let Some(col) = pos_q[j] {
                jacobian[row][n_p + col] = vm[i] * (g * cos + b * sin);
            }
        }
        // A bus without self admittance still needs its diagonal slot
        if ybus.row(i).all(|(j, _)| j != i) {
            if let Some(col) = pos_p[i] {
                jacobian[row][col] = -injections.q[i];
            }
            if let Some(col) = pos_q[i] {
                jacobian[row][n_p + col] = injections.p[i] / vm[i];
            }
        }
    }

    // M and L rows (ΔQ)
    for (row, &i) in layout.q_rows.iter().enumerate() {
        let row = n_p + row;
        for (j, y) in ybus.row(i) {
            let (g, b) = (y.re, y.im);
            if j == i {
                if let Some(col) = pos_p[i] {
                    jacobian[row][col] = injections.p[i] - g * vm[i] * vm[i];
                }
                if let Some(col) = pos_q[i] {
                    jacobian[row][n_p + col] = injections.q[i] / vm[i] - b * vm[i];
                }
                continue;
            }
            let (sin, cos) = (va[i] - va[j]).sin_cos();
            if let Some(col) = pos_p[j] {
                jacobian[row][col] = -vm[i] * vm[j] * (g * cos + b * sin);
            }
            if let Some(col) = pos_q[j] {
                jacobian[row][n_p + col] = vm[i] * (g * sin - b * cos);
            }
        }
        if ybus.row(i).all(|(j, _)| j != i) {
            if let Some(col) = pos_p[i] {
                jacobian[row][col] = injections.p[i];
            }
            if let Some(col) = pos_q[i] {
                jacobian[row][n_p + col] = injections.q[i] / vm[i];
            }
        }
    }

    jacobian
}

/// Full Newton-Raphson: a fresh Jacobian every iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NewtonRaphson;

impl UpdateRule for NewtonRaphson {
    fn method(&self) -> Method {
        Method::NewtonRaphson
    }

    fn prepare(
        &mut self,
        _ctx: &SolveContext<'_>,
        _state: &SolverState,
    ) -> Result<(), LinearSolveError> {
        Ok(())
    }

    fn step(
        &mut self,
        ctx: &SolveContext<'_>,
        state: &mut SolverState,
        injections: &Injections,
        mismatch: &Mismatch,
        layout: &MismatchLayout,
        _iteration: usize,
    ) -> Result<StepReport, LinearSolveError> {
        let jacobian = build_jacobian(ctx.ybus(), &state.voltages, injections, layout);
        let delta = ctx.backend.solve(&jacobian, &mismatch.values)?;
        if delta.iter().any(|dx| !dx.is_finite()) {
            return Err(LinearSolveError::Singular);
        }

        let damping = ctx.options.damping;
        let n_p = layout.p_rows.len();
        for (k, &i) in layout.p_rows.iter().enumerate() {
            state.voltages.va[i] += damping * delta[k];
        }
        for (k, &i) in layout.q_rows.iter().enumerate() {
            state.voltages.vm[i] += damping * delta[n_p + k];
        }

        let norm = delta.iter().map(|dx| dx * dx).sum::<f64>().sqrt();
        Ok(StepReport {
            step_norm: damping * norm,
            damping,
        })
    }
}
