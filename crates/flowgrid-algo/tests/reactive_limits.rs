//! PV→PQ switching at generator reactive limits, for every method

use flowgrid_algo::power_flow::LimitDirection;
use flowgrid_algo::{solve, BusClass, Method, PvSpec, SolveInput, SolveOptions};
use flowgrid_core::{Branch, BranchId, Bus, BusId, LineParams, Network};

const METHODS: [Method; 3] = [
    Method::NewtonRaphson,
    Method::GaussSeidel,
    Method::FastDecoupled,
];

/// 1–2–3 at 20 kV, 5 km sections of 0.1 + j0.4 Ω/km, load at bus 2.
fn chain_with_generator(vm_setpoint: f64, q_min: f64, q_max: f64) -> (Network, SolveInput) {
    let mut network = Network::new();
    for id in 1..=3 {
        network
            .add_bus(Bus::new(BusId::new(id), format!("Bus {id}")).with_base_kv(20.0))
            .unwrap();
    }
    for id in 1..3 {
        network
            .add_branch(Branch::line(
                BranchId::new(id),
                BusId::new(id),
                BusId::new(id + 1),
                LineParams {
                    r_ohm_per_km: 0.1,
                    x_ohm_per_km: 0.4,
                    length_km: 5.0,
                    ..LineParams::default()
                },
            ))
            .unwrap();
    }
    let input = SolveInput::new(10.0, BusId::new(1))
        .with_load(BusId::new(2), 4.0, 2.0)
        .with_generator(PvSpec {
            bus: BusId::new(3),
            p_mw: 1.0,
            vm_pu: vm_setpoint,
            q_min_mvar: Some(q_min),
            q_max_mvar: Some(q_max),
        });
    (network, input)
}

#[test]
fn generator_at_upper_limit_switches_once() {
    let (network, input) = chain_with_generator(1.05, -5.0, 1.0);

    for method in METHODS {
        let options = SolveOptions::default().with_method(method);
        let result = solve(&network, &input.clone().with_options(options)).unwrap();
        assert!(result.converged, "{method}: {:?}", result.failure);

        assert_eq!(result.switches.len(), 1, "{method}: {:?}", result.switches);
        let event = &result.switches[0];
        assert_eq!(event.bus, BusId::new(3));
        assert_eq!(event.direction, LimitDirection::Over);
        assert!(event.q_mvar > event.limit_mvar);
        assert!((event.limit_mvar - 1.0).abs() < 1e-12);

        let bus3 = result.bus(BusId::new(3)).unwrap();
        assert_eq!(
            bus3.class,
            BusClass::PvSwitched {
                direction: LimitDirection::Over
            }
        );
        // Voltage gives way once Q is pinned at the bound
        assert!(bus3.vm_pu < 1.05, "{method}: |V3| = {}", bus3.vm_pu);
        assert!((bus3.q_mvar.value() - 1.0).abs() < 1e-3);
    }
}

#[test]
fn generator_at_lower_limit_switches_under() {
    let (network, input) = chain_with_generator(0.93, -0.5, 5.0);
    let result = solve(&network, &input).unwrap();

    assert!(result.converged);
    assert_eq!(result.switches.len(), 1);
    assert_eq!(result.switches[0].direction, LimitDirection::Under);
    let bus3 = result.bus(BusId::new(3)).unwrap();
    assert!(bus3.vm_pu > 0.93);
    assert!((bus3.q_mvar.value() + 0.5).abs() < 1e-3);
}

#[test]
fn switched_bus_never_returns_to_pv() {
    let (network, input) = chain_with_generator(1.05, -5.0, 1.0);
    let mut options = SolveOptions::default();
    options.trace = flowgrid_algo::TraceLevel::Full;
    let result = solve(&network, &input.with_options(options)).unwrap();

    let switched_at = result.switches[0].iteration;
    for record in &result.trace.iterations {
        let class = record.snapshot.as_ref().unwrap()[2].class;
        if record.iteration > switched_at {
            assert!(
                matches!(class, BusClass::PvSwitched { .. }),
                "iteration {}: {class:?}",
                record.iteration
            );
        }
    }
}

#[test]
fn limits_ignored_when_enforcement_is_off() {
    let (network, input) = chain_with_generator(1.05, -5.0, 1.0);
    let options = SolveOptions::default().with_q_limit_enforcement(false);
    let result = solve(&network, &input.with_options(options)).unwrap();

    assert!(result.converged);
    assert!(result.switches.is_empty());
    let bus3 = result.bus(BusId::new(3)).unwrap();
    assert_eq!(bus3.class, BusClass::PvActive);
    assert!((bus3.vm_pu - 1.05).abs() < 1e-12);
    assert!(bus3.q_mvar.value() > 1.0);
}

#[test]
fn generous_limits_keep_voltage_control() {
    let (network, input) = chain_with_generator(1.0, -50.0, 50.0);
    let result = solve(&network, &input).unwrap();

    assert!(result.converged);
    assert!(result.switches.is_empty());
    assert!((result.bus(BusId::new(3)).unwrap().vm_pu - 1.0).abs() < 1e-12);
}

/// Slack bus 1 feeding two separate 5 km spurs, a generator at the end of each.
fn two_spurs(q_max: f64) -> (Network, SolveInput) {
    let mut network = Network::new();
    for id in 1..=3 {
        network
            .add_bus(Bus::new(BusId::new(id), format!("Bus {id}")).with_base_kv(20.0))
            .unwrap();
    }
    for id in 2..=3 {
        network
            .add_branch(Branch::line(
                BranchId::new(id),
                BusId::new(1),
                BusId::new(id),
                LineParams {
                    r_ohm_per_km: 0.1,
                    x_ohm_per_km: 0.4,
                    length_km: 5.0,
                    ..LineParams::default()
                },
            ))
            .unwrap();
    }
    let generator = |bus: usize| PvSpec {
        bus: BusId::new(bus),
        p_mw: 1.0,
        vm_pu: 1.05,
        q_min_mvar: Some(-5.0),
        q_max_mvar: Some(q_max),
    };
    // Listed out of bus order on purpose
    let input = SolveInput::new(10.0, BusId::new(1))
        .with_generator(generator(3))
        .with_generator(generator(2));
    (network, input)
}

#[test]
fn simultaneous_violators_switch_in_one_pass() {
    let (network, input) = two_spurs(1.0);

    for method in METHODS {
        let options = SolveOptions::default().with_method(method);
        let result = solve(&network, &input.clone().with_options(options)).unwrap();
        assert!(result.converged, "{method}: {:?}", result.failure);

        let buses: Vec<BusId> = result.switches.iter().map(|event| event.bus).collect();
        assert_eq!(buses, vec![BusId::new(2), BusId::new(3)], "{method}");
        assert_eq!(
            result.switches[0].iteration, result.switches[1].iteration,
            "{method}: {:?}",
            result.switches
        );
        for event in &result.switches {
            assert_eq!(event.direction, LimitDirection::Over);
        }
        for id in [2, 3] {
            let bus = result.bus(BusId::new(id)).unwrap();
            assert!(matches!(bus.class, BusClass::PvSwitched { .. }));
            assert!(bus.vm_pu < 1.05, "{method}: bus {id} at {}", bus.vm_pu);
        }
    }

    // Same log on a repeat solve
    let first = solve(&network, &input).unwrap();
    let second = solve(&network, &input).unwrap();
    assert_eq!(first.switches, second.switches);
}

#[test]
fn limits_are_checked_from_the_first_iteration() {
    let (network, input) = chain_with_generator(1.05, -5.0, 1.0);

    for method in METHODS {
        let options = SolveOptions::default().with_method(method);
        let result = solve(&network, &input.clone().with_options(options)).unwrap();
        assert_eq!(result.switches.len(), 1, "{method}");
        assert_eq!(result.switches[0].iteration, 0, "{method}");
    }
}

#[test]
fn activation_window_defers_the_driver_check() {
    let (network, input) = chain_with_generator(1.05, -5.0, 1.0);
    let mut options = SolveOptions::default();
    options.q_limit_activation = 1e-3;
    let result = solve(&network, &input.with_options(options)).unwrap();

    assert!(result.converged);
    assert_eq!(result.switches.len(), 1);
    // Flat start is far outside the window
    assert!(result.switches[0].iteration > 0);
    assert!((result.bus(BusId::new(3)).unwrap().q_mvar.value() - 1.0).abs() < 1e-3);
}
