//! Everything a solve needs besides the topology.
//!
//! Powers are given in MW/Mvar and converted to per-unit on
//! [`SolveInput::base_mva`]. [`PqSpec`] values are *demand*: a positive
//! `p_mw` is consumption and becomes a negative injection. [`PvSpec::p_mw`]
//! is generation and becomes a positive injection.

use super::options::SolveOptions;
use crate::error::ConfigError;
use flowgrid_core::{BranchId, BusId};
use serde::{Deserialize, Serialize};

/// Reference bus voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlackSpec {
    pub bus: BusId,
    #[serde(default = "one")]
    pub vm_pu: f64,
    #[serde(default)]
    pub va_rad: f64,
}

fn one() -> f64 {
    1.0
}

/// Fixed P/Q demand at a bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PqSpec {
    pub bus: BusId,
    pub p_mw: f64,
    pub q_mvar: f64,
}

/// Voltage-controlled generation at a bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PvSpec {
    pub bus: BusId,
    pub p_mw: f64,
    pub vm_pu: f64,
    #[serde(default)]
    pub q_min_mvar: Option<f64>,
    #[serde(default)]
    pub q_max_mvar: Option<f64>,
}

/// Bus shunt, specified as the power drawn at 1 pu voltage.
///
/// `g_mw` is consumed active power, `b_mvar` is injected reactive power
/// (positive = capacitor bank).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShuntSpec {
    pub bus: BusId,
    #[serde(default)]
    pub g_mw: f64,
    #[serde(default)]
    pub b_mvar: f64,
}

/// Replaces the catalog tap ratio of a transformer for this solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapOverride {
    pub branch: BranchId,
    pub ratio: f64,
}

/// Voltage band for violation checks; overrides catalog limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusVoltageLimit {
    pub bus: BusId,
    pub vmin_pu: f64,
    pub vmax_pu: f64,
}

/// Branch loading limits; each present field overrides the catalog rating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchLimit {
    pub branch: BranchId,
    #[serde(default)]
    pub max_mva: Option<f64>,
    #[serde(default)]
    pub max_ka: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveInput {
    pub base_mva: f64,
    pub slack: SlackSpec,
    #[serde(default)]
    pub pq: Vec<PqSpec>,
    #[serde(default)]
    pub pv: Vec<PvSpec>,
    #[serde(default)]
    pub shunts: Vec<ShuntSpec>,
    #[serde(default)]
    pub tap_overrides: Vec<TapOverride>,
    #[serde(default)]
    pub voltage_limits: Vec<BusVoltageLimit>,
    #[serde(default)]
    pub branch_limits: Vec<BranchLimit>,
    #[serde(default)]
    pub options: SolveOptions,
}

impl SolveInput {
    pub fn new(base_mva: f64, slack: BusId) -> Self {
        Self {
            base_mva,
            slack: SlackSpec {
                bus: slack,
                vm_pu: 1.0,
                va_rad: 0.0,
            },
            pq: Vec::new(),
            pv: Vec::new(),
            shunts: Vec::new(),
            tap_overrides: Vec::new(),
            voltage_limits: Vec::new(),
            branch_limits: Vec::new(),
            options: SolveOptions::default(),
        }
    }

    pub fn with_slack_voltage(mut self, vm_pu: f64, va_rad: f64) -> Self {
        self.slack.vm_pu = vm_pu;
        self.slack.va_rad = va_rad;
        self
    }

    pub fn with_load(mut self, bus: BusId, p_mw: f64, q_mvar: f64) -> Self {
        self.pq.push(PqSpec { bus, p_mw, q_mvar });
        self
    }

    pub fn with_generator(mut self, spec: PvSpec) -> Self {
        self.pv.push(spec);
        self
    }

    pub fn with_shunt(mut self, bus: BusId, g_mw: f64, b_mvar: f64) -> Self {
        self.shunts.push(ShuntSpec { bus, g_mw, b_mvar });
        self
    }

    pub fn with_tap(mut self, branch: BranchId, ratio: f64) -> Self {
        self.tap_overrides.push(TapOverride { branch, ratio });
        self
    }

    pub fn with_voltage_limit(mut self, bus: BusId, vmin_pu: f64, vmax_pu: f64) -> Self {
        self.voltage_limits.push(BusVoltageLimit {
            bus,
            vmin_pu,
            vmax_pu,
        });
        self
    }

    pub fn with_branch_limit(
        mut self,
        branch: BranchId,
        max_mva: Option<f64>,
        max_ka: Option<f64>,
    ) -> Self {
        self.branch_limits.push(BranchLimit {
            branch,
            max_mva,
            max_ka,
        });
        self
    }

    pub fn with_options(mut self, options: SolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }
}
