//! AC power flow
//!
//! Three methods share one contract: build the island's Y-bus, iterate on
//! bus voltages until the power mismatch drops below tolerance, then derive
//! branch flows, losses and limit violations.
//!
//! - [`ac_pf`]: Newton-Raphson on the full polar Jacobian
//! - [`gauss_seidel`]: Gauss-Seidel sweeps with optional over-relaxation
//! - [`fast_decoupled`]: Stott-Alsac fast-decoupled load flow (XB and BX)
//!
//! All of them run under the driver in [`iteration`], which owns the
//! convergence check, the PV→PQ switching of [`q_limits`] and the trace.
//!
//! ## Q-Limit Enforcement
//!
//! A generator whose reactive output leaves `[q_min, q_max]` has its bus
//! switched from PV (voltage-controlled) to PQ, with Q held at the violated
//! limit. Switching is one-way within a solve and every switch is logged in
//! [`SolveResult::switches`].

pub mod ac_pf;
pub mod branch_flow;
pub mod fast_decoupled;
pub mod gauss_seidel;
pub mod injection;
pub mod input;
pub mod iteration;
pub mod options;
pub mod q_limits;
pub mod result;
mod solve;

pub use branch_flow::{
    BranchFlow, BusResult, ElementRef, UnconvertedEntry, Violation, ViolationKind,
    ViolationSummary,
};
pub use input::{
    BranchLimit, BusVoltageLimit, PqSpec, PvSpec, ShuntSpec, SlackSpec, SolveInput, TapOverride,
};
pub use iteration::{BusSnapshot, FailureCause, IterationRecord, SolveOutcome};
pub use options::{FdVariant, Method, SolveOptions, TraceLevel};
pub use q_limits::{BusClass, LimitDirection, SwitchEvent};
pub use result::{PowerBalance, SlackPower, SolveResult, SolveTrace};
pub use solve::{solve, solve_batch};
