//! Dense linear system backends.
//!
//! Every iterative method in the engine reduces its update to `A·x = b` with
//! a small dense `A` (Jacobian, B′, B″). Backends factorize once and solve
//! repeatedly so constant matrices are not decomposed twice.

pub mod backend;
pub mod registry;

pub use backend::{
    Factorization, FaerSolver, GaussSolver, LinearSolveError, LinearSystemBackend,
};
pub use registry::LinearSolverKind;
