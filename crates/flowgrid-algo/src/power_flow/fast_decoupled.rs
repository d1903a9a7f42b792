//! Fast-Decoupled Power Flow (FDPF) update rule
//!
//! Implements the Stott-Alsac fast-decoupled load flow method which decouples
//! the P-θ and Q-V subproblems for faster convergence on well-conditioned networks.
//!
//! ## Algorithm Overview
//!
//! Instead of solving the full Jacobian system, FDPF uses:
//! - B' matrix for P-θ subproblem: ΔP/V = B' × Δθ
//! - B'' matrix for Q-V subproblem: ΔQ/V = B'' × ΔV
//!
//! Both are taken as `−Im(Y)` of a modified admittance matrix built from the
//! same branch stamps as the Y-bus:
//!
//! | | B' | B'' |
//! |---|---|---|
//! | bus and branch shunts | dropped | kept |
//! | tap ratio | 1.0 | kept |
//! | phase shift | kept | dropped |
//! | series resistance (XB) | dropped | kept |
//! | series resistance (BX) | kept | dropped |
//!
//! The matrices are factorized once. A PV→PQ switch only changes the Q-V rows,
//! so only B'' is rebuilt. With `fd_refresh_interval = N` both are re-derived
//! from the decoupled Jacobian blocks at the current iterate every N
//! iterations (`B'_ij = H_ij/V_i`, `B''_ij = L_ij/V_i`).
//!
//! ## References
//!
//! - Stott & Alsac (1974): "Fast Decoupled Load Flow"
//!   IEEE Trans. PAS, 93(3), 859-869
//!   DOI: [10.1109/TPAS.1974.293985](https://doi.org/10.1109/TPAS.1974.293985)
//! - van Amerongen (1989): "A general-purpose version of the fast decoupled load flow"
//!   IEEE Trans. Power Systems, 4(2), 760-770

use super::ac_pf::build_jacobian;
use super::injection::{compute_injections, Injections, Mismatch, MismatchLayout};
use super::iteration::{SolveContext, SolverState, StepReport, UpdateRule};
use super::options::{FdVariant, Method};
use crate::sparse::AdmittanceModel;
use flowgrid_core::solver::{Factorization, LinearSolveError, LinearSystemBackend};
use num_complex::Complex64;
use tracing::debug;

/// Which physical effects a decoupled matrix keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Modifiers {
    resistance: bool,
    shunts: bool,
    taps: bool,
    shift: bool,
}

fn b_prime_modifiers(variant: FdVariant) -> Modifiers {
    Modifiers {
        resistance: variant == FdVariant::Bx,
        shunts: false,
        taps: false,
        shift: true,
    }
}

fn b_double_prime_modifiers(variant: FdVariant) -> Modifiers {
    Modifiers {
        resistance: variant == FdVariant::Xb,
        shunts: true,
        taps: true,
        shift: false,
    }
}

/// Dense `−Im(Y_mod)` restricted to `rows × rows`.
fn susceptance_matrix(model: &AdmittanceModel, rows: &[usize], modifiers: Modifiers) -> Vec<Vec<f64>> {
    let n = model.ybus.n_bus();
    let mut pos = vec![None; n];
    for (k, &i) in rows.iter().enumerate() {
        pos[i] = Some(k);
    }
    let mut matrix = vec![vec![0.0; rows.len()]; rows.len()];
    let mut add = |i: usize, j: usize, y: Complex64| {
        if let (Some(r), Some(c)) = (pos[i], pos[j]) {
            matrix[r][c] -= y.im;
        }
    };

    for stamp in model.stamps() {
        let y = if modifiers.resistance {
            stamp.y_series
        } else if stamp.z_series.im.abs() > 0.0 {
            Complex64::new(0.0, stamp.z_series.im).inv()
        } else {
            // Purely resistive branch has no reactance to keep
            continue;
        };
        let (y_from, y_to) = if modifiers.shunts {
            (stamp.y_shunt_from, stamp.y_shunt_to)
        } else {
            Default::default()
        };
        let ratio = if modifiers.taps { stamp.tap_ratio } else { 1.0 };
        let shift = if modifiers.shift { stamp.shift_rad } else { 0.0 };
        let tap = Complex64::from_polar(ratio, shift);

        let (f, t) = (stamp.from_idx, stamp.to_idx);
        add(f, f, (y + y_from) / (ratio * ratio));
        add(t, t, y + y_to);
        add(f, t, -y / tap.conj());
        add(t, f, -y / tap);
    }

    if modifiers.shunts {
        for (i, &y) in model.bus_shunts().iter().enumerate() {
            add(i, i, y);
        }
    }
    matrix
}

/// B' over the θ unknowns (non-slack buses).
pub fn build_b_prime(
    model: &AdmittanceModel,
    layout: &MismatchLayout,
    variant: FdVariant,
) -> Vec<Vec<f64>> {
    susceptance_matrix(model, &layout.p_rows, b_prime_modifiers(variant))
}

/// B'' over the |V| unknowns (PQ-classified buses).
pub fn build_b_double_prime(
    model: &AdmittanceModel,
    layout: &MismatchLayout,
    variant: FdVariant,
) -> Vec<Vec<f64>> {
    susceptance_matrix(model, &layout.q_rows, b_double_prime_modifiers(variant))
}

fn factorize(
    backend: &dyn LinearSystemBackend,
    matrix: &[Vec<f64>],
) -> Result<Option<Box<dyn Factorization>>, LinearSolveError> {
    if matrix.is_empty() {
        return Ok(None);
    }
    backend.factorize(matrix).map(Some)
}

fn solve_with(
    factors: &Option<Box<dyn Factorization>>,
    rhs: &[f64],
) -> Result<Vec<f64>, LinearSolveError> {
    match factors {
        Some(lu) => {
            let x = lu.solve(rhs)?;
            if x.iter().any(|v| !v.is_finite()) {
                return Err(LinearSolveError::Singular);
            }
            Ok(x)
        }
        None => Ok(Vec::new()),
    }
}

/// Fast-Decoupled method holding the B' and B'' factors between iterations.
#[derive(Default)]
pub struct FastDecoupled {
    b_prime: Option<Box<dyn Factorization>>,
    b_double_prime: Option<Box<dyn Factorization>>,
}

impl FastDecoupled {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derive both matrices from the Jacobian at the current iterate.
    fn refresh(
        &mut self,
        ctx: &SolveContext<'_>,
        state: &SolverState,
        injections: &Injections,
        layout: &MismatchLayout,
    ) -> Result<(), LinearSolveError> {
        let jacobian = build_jacobian(ctx.ybus(), &state.voltages, injections, layout);
        let n_p = layout.p_rows.len();
        let vm = &state.voltages.vm;

        let b_prime: Vec<Vec<f64>> = layout
            .p_rows
            .iter()
            .enumerate()
            .map(|(r, &i)| jacobian[r][..n_p].iter().map(|h| h / vm[i]).collect())
            .collect();
        let b_double_prime: Vec<Vec<f64>> = layout
            .q_rows
            .iter()
            .enumerate()
            .map(|(r, &i)| jacobian[n_p + r][n_p..].iter().map(|l| l / vm[i]).collect())
            .collect();

        self.b_prime = factorize(ctx.backend.as_ref(), &b_prime)?;
        self.b_double_prime = factorize(ctx.backend.as_ref(), &b_double_prime)?;
        Ok(())
    }
}

impl UpdateRule for FastDecoupled {
    fn method(&self) -> Method {
        Method::FastDecoupled
    }

    fn prepare(&mut self, ctx: &SolveContext<'_>, state: &SolverState) -> Result<(), LinearSolveError> {
        let layout = state.classes.layout();
        let variant = ctx.options.fd_variant;
        let b_prime = build_b_prime(ctx.model, &layout, variant);
        let b_double_prime = build_b_double_prime(ctx.model, &layout, variant);
        debug!(
            ?variant,
            b_prime_dim = b_prime.len(),
            b_double_prime_dim = b_double_prime.len(),
            "factorizing decoupled matrices"
        );
        self.b_prime = factorize(ctx.backend.as_ref(), &b_prime)?;
        self.b_double_prime = factorize(ctx.backend.as_ref(), &b_double_prime)?;
        Ok(())
    }

    fn on_reclassify(&mut self, ctx: &SolveContext<'_>, state: &SolverState) -> Result<(), LinearSolveError> {
        let layout = state.classes.layout();
        let b_double_prime = build_b_double_prime(ctx.model, &layout, ctx.options.fd_variant);
        debug!(dim = b_double_prime.len(), "rebuilding B'' after reclassification");
        self.b_double_prime = factorize(ctx.backend.as_ref(), &b_double_prime)?;
        Ok(())
    }

    fn step(
        &mut self,
        ctx: &SolveContext<'_>,
        state: &mut SolverState,
        injections: &Injections,
        mismatch: &Mismatch,
        layout: &MismatchLayout,
        iteration: usize,
    ) -> Result<StepReport, LinearSolveError> {
        if let Some(interval) = ctx.options.fd_refresh_interval.filter(|&n| n > 0) {
            if iteration > 0 && iteration % interval == 0 {
                debug!(iteration, "refreshing decoupled matrices");
                self.refresh(ctx, state, injections, layout)?;
            }
        }

        let damping_p = ctx.options.fd_damping_p;
        let damping_q = ctx.options.fd_damping_q;

        // P-θ half step
        let rhs_p: Vec<f64> = layout
            .p_rows
            .iter()
            .zip(mismatch.p_part(layout))
            .map(|(&i, dp)| dp / state.voltages.vm[i])
            .collect();
        let d_theta = solve_with(&self.b_prime, &rhs_p)?;
        for (&i, dt) in layout.p_rows.iter().zip(&d_theta) {
            state.voltages.va[i] += damping_p * dt;
        }

        // Q-V half step on the updated angles
        let mut d_vm = Vec::new();
        if !layout.q_rows.is_empty() {
            let updated = compute_injections(ctx.ybus(), &state.voltages);
            let rhs_q: Vec<f64> = layout
                .q_rows
                .iter()
                .map(|&i| (state.spec.q[i] - updated.q[i]) / state.voltages.vm[i])
                .collect();
            d_vm = solve_with(&self.b_double_prime, &rhs_q)?;
            for (&i, dv) in layout.q_rows.iter().zip(&d_vm) {
                state.voltages.vm[i] += damping_q * dv;
            }
        }

        let step_sq = d_theta.iter().map(|x| (damping_p * x).powi(2)).sum::<f64>()
            + d_vm.iter().map(|x| (damping_q * x).powi(2)).sum::<f64>();
        Ok(StepReport {
            step_norm: step_sq.sqrt(),
            damping: damping_p,
        })
    }
}
