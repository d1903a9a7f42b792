//! Small networks shared by the unit tests.

use crate::power_flow::{PvSpec, SolveInput};
use flowgrid_core::{Branch, BranchId, Bus, BusId, BusKind, LineParams, Network};

pub fn line(r_ohm_per_km: f64, x_ohm_per_km: f64, length_km: f64) -> LineParams {
    LineParams {
        r_ohm_per_km,
        x_ohm_per_km,
        length_km,
        ..LineParams::default()
    }
}

/// Buses 1..=n on a chain, bus 1 tagged slack, every section the same line.
pub fn radial_feeder(n: usize, params: LineParams, base_kv: f64) -> Network {
    let mut network = Network::new();
    for id in 1..=n {
        let kind = if id == 1 { BusKind::Slack } else { BusKind::Pq };
        network
            .add_bus(
                Bus::new(BusId::new(id), format!("Bus {id}"))
                    .with_kind(kind)
                    .with_base_kv(base_kv),
            )
            .expect("unique bus");
    }
    for id in 1..n {
        network
            .add_branch(Branch::line(
                BranchId::new(id),
                BusId::new(id),
                BusId::new(id + 1),
                params,
            ))
            .expect("known endpoints");
    }
    network
}

/// Slack A, one 1 km line (0.4 + j0.8 Ω/km) to B at 10 kV, 2 MW / 1 Mvar at B.
pub fn two_bus_case() -> (Network, SolveInput) {
    let network = radial_feeder(2, line(0.4, 0.8, 1.0), 10.0);
    let input = SolveInput::new(10.0, BusId::new(1)).with_load(BusId::new(2), 2.0, 1.0);
    (network, input)
}

/// Meshed 4-bus 20 kV system with a generator at bus 3 and loads at 2 and 4.
pub fn meshed_case() -> (Network, SolveInput) {
    let mut network = radial_feeder(4, line(0.2, 0.4, 3.0), 20.0);
    network
        .add_branch(Branch::line(
            BranchId::new(10),
            BusId::new(4),
            BusId::new(1),
            line(0.2, 0.4, 4.0),
        ))
        .expect("known endpoints");
    let input = SolveInput::new(10.0, BusId::new(1))
        .with_load(BusId::new(2), 3.0, 1.2)
        .with_load(BusId::new(4), 2.0, 0.8)
        .with_generator(PvSpec {
            bus: BusId::new(3),
            p_mw: 1.5,
            vm_pu: 1.0,
            q_min_mvar: None,
            q_max_mvar: None,
        });
    (network, input)
}
