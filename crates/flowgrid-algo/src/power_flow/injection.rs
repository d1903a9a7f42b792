//! Power injection and mismatch calculation.
//!
//! ```text
//! I = Y·V          S = V ⊙ conj(I)          ΔP = P_spec − P_calc   (non-slack)
//!                                           ΔQ = Q_spec − Q_calc   (PQ-classified)
//! ```
//!
//! The mismatch vector is always laid out as `[ΔP over non-slack buses in
//! index order, ΔQ over PQ-classified buses in index order]`. Every solver
//! and matrix builder uses the same [`MismatchLayout`].

use super::input::SolveInput;
use crate::sparse::SparseYBus;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Voltage state in polar form, indexed like the Y-bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageState {
    pub vm: Vec<f64>,
    pub va: Vec<f64>,
}

impl VoltageState {
    pub fn flat(n: usize) -> Self {
        Self {
            vm: vec![1.0; n],
            va: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.vm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vm.is_empty()
    }

    pub fn phasor(&self, i: usize) -> Complex64 {
        Complex64::from_polar(self.vm[i], self.va[i])
    }

    pub fn phasors(&self) -> Vec<Complex64> {
        (0..self.len()).map(|i| self.phasor(i)).collect()
    }

    pub fn set_phasor(&mut self, i: usize, v: Complex64) {
        let (vm, va) = v.to_polar();
        self.vm[i] = vm;
        self.va[i] = va;
    }
}

/// Calculated bus injections (pu).
#[derive(Debug, Clone, PartialEq)]
pub struct Injections {
    pub p: Vec<f64>,
    pub q: Vec<f64>,
}

impl Injections {
    pub fn apparent(&self, i: usize) -> Complex64 {
        Complex64::new(self.p[i], self.q[i])
    }
}

/// S = V ⊙ conj(Y·V), split into P and Q.
pub fn compute_injections(ybus: &SparseYBus, state: &VoltageState) -> Injections {
    let v = state.phasors();
    let current = ybus.mul_vec(&v);
    let (p, q) = v
        .iter()
        .zip(current.iter())
        .map(|(vi, ii)| {
            let s = vi * ii.conj();
            (s.re, s.im)
        })
        .unzip();
    Injections { p, q }
}

/// Specified net injections per bus index (pu).
///
/// `local_p`/`local_q` hold the part coming from PQ specs, so that the
/// generator share at PV and slack buses can be separated from local demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecifiedPower {
    pub p: Vec<f64>,
    pub q: Vec<f64>,
    pub local_p: Vec<f64>,
    pub local_q: Vec<f64>,
}

impl SpecifiedPower {
    /// Collect specs for buses inside the Y-bus; specs elsewhere are ignored.
    pub fn from_input(input: &SolveInput, ybus: &SparseYBus) -> Self {
        let n = ybus.n_bus();
        let base = input.base_mva;
        let mut spec = Self {
            p: vec![0.0; n],
            q: vec![0.0; n],
            local_p: vec![0.0; n],
            local_q: vec![0.0; n],
        };

        for load in &input.pq {
            if let Some(i) = ybus.bus_index(load.bus) {
                spec.local_p[i] -= load.p_mw / base;
                spec.local_q[i] -= load.q_mvar / base;
            }
        }
        spec.p.copy_from_slice(&spec.local_p);
        spec.q.copy_from_slice(&spec.local_q);

        // Slack generation is an output of the solve
        for gen in input.pv.iter().filter(|g| g.bus != input.slack.bus) {
            if let Some(i) = ybus.bus_index(gen.bus) {
                spec.p[i] += gen.p_mw / base;
            }
        }
        spec
    }
}

/// Which buses contribute mismatch rows, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MismatchLayout {
    /// Non-slack bus indices (ΔP rows and θ unknowns)
    pub p_rows: Vec<usize>,
    /// PQ-classified bus indices (ΔQ rows and |V| unknowns)
    pub q_rows: Vec<usize>,
}

impl MismatchLayout {
    pub fn len(&self) -> usize {
        self.p_rows.len() + self.q_rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// `[ΔP..., ΔQ...]` following the layout
    pub values: Vec<f64>,
    pub max_abs: f64,
    pub norm2: f64,
}

impl Mismatch {
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    pub fn p_part(&self, layout: &MismatchLayout) -> &[f64] {
        &self.values[..layout.p_rows.len()]
    }

    pub fn q_part(&self, layout: &MismatchLayout) -> &[f64] {
        &self.values[layout.p_rows.len()..]
    }
}

pub fn compute_mismatch(
    spec: &SpecifiedPower,
    injections: &Injections,
    layout: &MismatchLayout,
) -> Mismatch {
    let values: Vec<f64> = layout
        .p_rows
        .iter()
        .map(|&i| spec.p[i] - injections.p[i])
        .chain(layout.q_rows.iter().map(|&i| spec.q[i] - injections.q[i]))
        .collect();

    let max_abs = if values.iter().all(|v| v.is_finite()) {
        values.iter().fold(0.0f64, |m, v| m.max(v.abs()))
    } else {
        f64::INFINITY
    };
    let norm2 = values.iter().map(|v| v * v).sum::<f64>().sqrt();

    Mismatch {
        values,
        max_abs,
        norm2,
    }
}
