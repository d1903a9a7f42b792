use super::backend::{FaerSolver, GaussSolver, LinearSystemBackend};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Registry of available linear solvers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearSolverKind {
    #[default]
    Faer,
    Gauss,
}

impl FromStr for LinearSolverKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "faer" | "default" => Ok(LinearSolverKind::Faer),
            "gauss" => Ok(LinearSolverKind::Gauss),
            other => Err(format!(
                "unknown linear solver '{}'; supported values: {}",
                other,
                Self::available().join(", ")
            )),
        }
    }
}

impl LinearSolverKind {
    pub fn build_solver(self) -> Arc<dyn LinearSystemBackend> {
        match self {
            LinearSolverKind::Faer => Arc::new(FaerSolver),
            LinearSolverKind::Gauss => Arc::new(GaussSolver),
        }
    }

    pub fn available() -> &'static [&'static str] {
        &["faer", "gauss"]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinearSolverKind::Faer => "faer",
            LinearSolverKind::Gauss => "gauss",
        }
    }
}
