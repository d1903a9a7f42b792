//! Solve options.
//!
//! [`SolveOptions`] is a plain value handed to every solve. Partial TOML or
//! JSON documents are accepted; missing keys fall back to [`Default`].
//!
//! ```
//! use flowgrid_algo::{Method, SolveOptions};
//!
//! let options = SolveOptions::from_toml_str(
//!     r#"
//!     method = "fast_decoupled"
//!     tolerance = 1e-8
//!     fd_variant = "bx"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(options.method, Method::FastDecoupled);
//! assert_eq!(options.max_iterations(), 50);
//! assert!(options.flat_start);
//! ```

use crate::error::ConfigError;
use flowgrid_core::solver::LinearSolverKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Iterative method used for the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    NewtonRaphson,
    GaussSeidel,
    FastDecoupled,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::NewtonRaphson => "newton_raphson",
            Method::GaussSeidel => "gauss_seidel",
            Method::FastDecoupled => "fast_decoupled",
        }
    }

    /// Iteration cap used when the options leave it unset.
    pub fn default_max_iterations(&self) -> usize {
        match self {
            Method::NewtonRaphson => 20,
            Method::GaussSeidel => 1000,
            Method::FastDecoupled => 50,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fast-Decoupled matrix variant.
///
/// `Xb` drops series resistance from B′ and keeps it in B″; `Bx` does the
/// opposite. Both keep shunts and off-nominal taps out of B′.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FdVariant {
    #[default]
    Xb,
    Bx,
}

/// How much the trace records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    /// Setup decisions and the final iteration record only
    Summary,
    /// Every iteration record, without bus snapshots
    #[default]
    Iterations,
    /// Every iteration with a per-bus snapshot, plus all Ybus entries
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    pub method: Method,
    /// Convergence threshold on the inf-norm of the mismatch vector (pu)
    pub tolerance: f64,
    /// Iteration cap; `None` picks [`Method::default_max_iterations`]
    pub max_iterations: Option<usize>,
    /// Newton step scaling, in (0, 1]
    pub damping: f64,
    /// Gauss-Seidel SOR acceleration factor, in (0, 2)
    pub acceleration: f64,
    pub fd_variant: FdVariant,
    /// Fast-Decoupled P-θ half-step scaling, in (0, 1]
    pub fd_damping_p: f64,
    /// Fast-Decoupled Q-V half-step scaling, in (0, 1]
    pub fd_damping_q: f64,
    /// Re-derive B′/B″ at the current iterate every N iterations
    pub fd_refresh_interval: Option<usize>,
    /// Start from 1∠0 instead of the topology's prior estimates
    pub flat_start: bool,
    pub enforce_q_limits: bool,
    /// Mismatch inf-norm below which the driver starts checking reactive
    /// limits (always at apparent convergence). Zero checks on every
    /// iteration. Gauss-Seidel also checks inside each sweep regardless.
    pub q_limit_activation: f64,
    pub trace: TraceLevel,
    pub validate: bool,
    /// Number of worst violations listed in the summary
    pub violation_top_n: usize,
    pub linear_solver: LinearSolverKind,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            method: Method::NewtonRaphson,
            tolerance: 1e-6,
            max_iterations: None,
            damping: 1.0,
            acceleration: 1.0,
            fd_variant: FdVariant::Xb,
            fd_damping_p: 1.0,
            fd_damping_q: 1.0,
            fd_refresh_interval: None,
            flat_start: true,
            enforce_q_limits: true,
            q_limit_activation: 0.0,
            trace: TraceLevel::Iterations,
            validate: true,
            violation_top_n: 10,
            linear_solver: LinearSolverKind::Faer,
        }
    }
}

impl SolveOptions {
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = Some(max_iter);
        self
    }

    pub fn with_q_limit_enforcement(mut self, enable: bool) -> Self {
        self.enforce_q_limits = enable;
        self
    }

    pub fn with_trace(mut self, level: TraceLevel) -> Self {
        self.trace = level;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
            .unwrap_or_else(|| self.method.default_max_iterations())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let options = SolveOptions::from_toml_str("").unwrap();
        assert_eq!(options, SolveOptions::default());
        assert_eq!(options.max_iterations(), 20);
    }

    #[test]
    fn explicit_iteration_cap_wins() {
        let options = SolveOptions::default()
            .with_method(Method::GaussSeidel)
            .with_max_iterations(7);
        assert_eq!(options.max_iterations(), 7);
        assert_eq!(
            SolveOptions::default()
                .with_method(Method::GaussSeidel)
                .max_iterations(),
            1000
        );
    }

    #[test]
    fn toml_enums_use_snake_case() {
        let options = SolveOptions::from_toml_str(
            r#"
            method = "gauss_seidel"
            acceleration = 1.6
            trace = "full"
            linear_solver = "gauss"
            "#,
        )
        .unwrap();
        assert_eq!(options.method, Method::GaussSeidel);
        assert_eq!(options.trace, TraceLevel::Full);
        assert_eq!(options.linear_solver, LinearSolverKind::Gauss);
        assert!((options.acceleration - 1.6).abs() < 1e-12);
    }

    #[test]
    fn unknown_method_is_a_config_error() {
        let err = SolveOptions::from_toml_str(r#"method = "holomorphic""#).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SolveOptions::load_from(Path::new("/nonexistent/flowgrid.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/flowgrid.toml"));
    }
}
