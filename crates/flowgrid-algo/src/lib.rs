//! # flowgrid-algo: AC power flow for distribution and transmission grids
//!
//! Computes the steady-state voltage at every bus of the slack bus's island
//! from specified loads, generators, shunts and transformer taps, then
//! derives branch flows, losses and limit violations.
//!
//! ## Methods
//!
//! | Method | Linear algebra | Typical iterations |
//! |--------|----------------|--------------------|
//! | [`Method::NewtonRaphson`] | full Jacobian every iteration | 3-6 |
//! | [`Method::GaussSeidel`] | none (bus-by-bus sweep) | tens to hundreds |
//! | [`Method::FastDecoupled`] | constant B′/B″ factored once | 5-15 |
//!
//! Every method enforces generator reactive limits by one-way PV→PQ
//! switching and records its full trajectory in [`SolveTrace`].
//!
//! ## Outcomes
//!
//! Setup problems (invalid input, a slack bus outside the topology) are
//! [`PowerFlowError`]s. Numerical trouble is not: a solve that runs out of
//! iterations or meets a singular matrix still returns a [`SolveResult`] with
//! `converged = false` and a [`FailureCause`].
//!
//! ## Example
//!
//! ```ignore
//! use flowgrid_algo::{solve, SolveInput};
//! use flowgrid_core::BusId;
//!
//! let input = SolveInput::new(10.0, BusId::new(1)).with_load(BusId::new(2), 2.0, 1.0);
//! let result = solve(&network, &input)?;
//! println!("{:?} after {} iterations", result.outcome, result.iterations);
//! println!("Losses: {:.4} MW", result.losses_mw.value());
//! ```

pub mod error;
pub mod power_flow;
pub mod sparse;
pub mod validation;

#[cfg(test)]
mod test_utils;

pub use error::{ConfigError, PowerFlowError, PowerFlowResult};
pub use power_flow::{
    solve, solve_batch, BranchFlow, BusClass, BusResult, FailureCause, FdVariant, Method,
    PqSpec, PvSpec, SolveInput, SolveOptions, SolveOutcome, SolveResult, SolveTrace,
    TraceLevel, Violation, ViolationKind,
};
pub use sparse::{AdmittanceBuilder, AdmittanceModel, SparseYBus, YBusError};
pub use validation::validate_input;
