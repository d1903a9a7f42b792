//! Error types for the power-flow engine.
//!
//! Only setup problems are errors. A solve that runs out of iterations or
//! hits a singular matrix still returns a [`SolveResult`](crate::SolveResult)
//! with `converged = false` and a failure cause.

use flowgrid_core::{BusId, Diagnostics};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that stop a solve before the first iteration.
#[derive(Debug, Error)]
pub enum PowerFlowError {
    /// The slack bus is not part of any energized island.
    #[error("slack bus {slack} not found in the network topology")]
    SlackIslandNotFound { slack: BusId },

    /// Pre-solve validation reported at least one error.
    #[error("pre-solve validation failed: {0}")]
    ValidationFailed(Diagnostics),

    /// Loading options or input failed. [`solve`](crate::solve) never
    /// returns this; the `From` impl lets callers load and solve in one
    /// function with `?`.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PowerFlowError {
    /// Validation findings, if this is a validation failure.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            PowerFlowError::ValidationFailed(diag) => Some(diag),
            _ => None,
        }
    }
}

/// Errors from loading solve options or inputs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML options: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PowerFlowResult<T> = Result<T, PowerFlowError>;
