//! # Sparse admittance model
//!
//! Power grids are sparse: a bus connects to a handful of neighbours, so the
//! Y-bus of an n-bus island has O(n) non-zeros. [`ybus`] assembles it from
//! per-branch stamps that are kept alongside the matrix, so the
//! Fast-Decoupled matrices and the branch flows use exactly the admittances
//! the iteration saw.

pub mod ybus;

pub use ybus::{
    AdmittanceBuilder, AdmittanceModel, AppliedShunt, AppliedTap, BranchStamp, IslandReport,
    SkippedElement, SparseYBus, StampKind, TapSource, YBusError, YbusEntry, YbusTrace,
};
