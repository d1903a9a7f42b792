//! Error types for building a [`Network`](crate::Network).

use crate::{BranchId, BusId};
use thiserror::Error;

/// Errors raised while assembling the topology model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("bus {0} is already present in the network")]
    DuplicateBus(BusId),

    #[error("branch {0} is already present in the network")]
    DuplicateBranch(BranchId),

    #[error("branch {branch} references unknown bus {bus}")]
    UnknownBus { branch: BranchId, bus: BusId },

    #[error("branch {0} connects a bus to itself")]
    SelfLoop(BranchId),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
