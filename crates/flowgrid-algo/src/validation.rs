//! Pre-solve validation of a [`SolveInput`] against the network it targets.
//!
//! Findings are reported through [`Diagnostics`]. Errors stop the solve
//! before the Y-bus is built; warnings are carried into the result trace.

use crate::power_flow::{SolveInput, SolveOptions};
use flowgrid_core::{island_containing, BranchKind, BusId, BusKind, Diagnostics, Network};
use std::collections::{BTreeMap, BTreeSet};

/// Slack magnitudes outside this band are suspicious but allowed.
const PLAUSIBLE_SLACK_VM: (f64, f64) = (0.8, 1.2);

/// Run every check and collect the findings.
pub fn validate_input(network: &Network, input: &SolveInput) -> Diagnostics {
    let mut diag = Diagnostics::new();

    validate_base(input, &mut diag);
    validate_slack(network, input, &mut diag);
    validate_specs(network, input, &mut diag);
    validate_taps(network, input, &mut diag);
    validate_limits(network, input, &mut diag);
    validate_options(&input.options, &mut diag);

    validate_type_tags(network, input, &mut diag);
    validate_impedances(network, &mut diag);
    validate_island_membership(network, input, &mut diag);

    diag
}

fn bus_entity(bus: BusId) -> String {
    format!("bus {bus}")
}

fn validate_base(input: &SolveInput, diag: &mut Diagnostics) {
    if !(input.base_mva.is_finite() && input.base_mva > 0.0) {
        diag.add_error(
            "input",
            &format!("base MVA must be positive and finite (got {})", input.base_mva),
        );
    }
}

fn validate_slack(network: &Network, input: &SolveInput, diag: &mut Diagnostics) {
    let slack = input.slack;
    let entity = bus_entity(slack.bus);

    if !network.contains_bus(slack.bus) {
        diag.add_error_with_entity("reference", "slack bus does not exist in the network", &entity);
    }
    if !(slack.vm_pu.is_finite() && slack.vm_pu > 0.0) {
        diag.add_error_with_entity(
            "slack",
            &format!("slack voltage magnitude must be positive (got {})", slack.vm_pu),
            &entity,
        );
    } else if slack.vm_pu < PLAUSIBLE_SLACK_VM.0 || slack.vm_pu > PLAUSIBLE_SLACK_VM.1 {
        diag.add_warning_with_entity(
            "slack",
            &format!("implausible slack voltage {:.3} pu", slack.vm_pu),
            &entity,
        );
    }
    if !slack.va_rad.is_finite() {
        diag.add_error_with_entity("slack", "slack voltage angle is not finite", &entity);
    }
}

fn validate_specs(network: &Network, input: &SolveInput, diag: &mut Diagnostics) {
    let mut pq_seen = BTreeSet::new();
    for load in &input.pq {
        let entity = bus_entity(load.bus);
        if !network.contains_bus(load.bus) {
            diag.add_error_with_entity("reference", "PQ spec references an unknown bus", &entity);
        }
        if !pq_seen.insert(load.bus) {
            diag.add_error_with_entity("duplicate", "more than one PQ spec for this bus", &entity);
        }
        if !(load.p_mw.is_finite() && load.q_mvar.is_finite()) {
            diag.add_error_with_entity("pq", "PQ spec power is not finite", &entity);
        }
    }

    let mut pv_seen = BTreeSet::new();
    for gen in &input.pv {
        let entity = bus_entity(gen.bus);
        if !network.contains_bus(gen.bus) {
            diag.add_error_with_entity("reference", "PV spec references an unknown bus", &entity);
        }
        if !pv_seen.insert(gen.bus) {
            diag.add_error_with_entity("duplicate", "more than one PV spec for this bus", &entity);
        }
        if gen.bus == input.slack.bus {
            diag.add_error_with_entity("pv", "PV spec on the slack bus", &entity);
        }
        if !(gen.vm_pu.is_finite() && gen.vm_pu > 0.0) {
            diag.add_error_with_entity(
                "pv",
                &format!("voltage setpoint must be positive (got {})", gen.vm_pu),
                &entity,
            );
        }
        if !gen.p_mw.is_finite() {
            diag.add_error_with_entity("pv", "PV spec active power is not finite", &entity);
        }
        if let (Some(q_min), Some(q_max)) = (gen.q_min_mvar, gen.q_max_mvar) {
            if q_min > q_max {
                diag.add_error_with_entity(
                    "pv",
                    &format!("q_min ({q_min} Mvar) exceeds q_max ({q_max} Mvar)"),
                    &entity,
                );
            }
        }
    }

    for shunt in &input.shunts {
        let entity = bus_entity(shunt.bus);
        if !network.contains_bus(shunt.bus) {
            diag.add_error_with_entity("reference", "shunt references an unknown bus", &entity);
        }
        if !(shunt.g_mw.is_finite() && shunt.b_mvar.is_finite()) {
            diag.add_error_with_entity("shunt", "shunt admittance is not finite", &entity);
        }
    }
}

fn validate_taps(network: &Network, input: &SolveInput, diag: &mut Diagnostics) {
    for tap in &input.tap_overrides {
        let entity = format!("branch {}", tap.branch);
        match network.branch(tap.branch) {
            None => {
                diag.add_error_with_entity("reference", "tap override on an unknown branch", &entity)
            }
            Some(branch) if !branch.is_transformer() => diag.add_error_with_entity(
                "tap",
                "tap override on a branch that is not a transformer",
                &entity,
            ),
            Some(_) => {}
        }
        if !(tap.ratio.is_finite() && tap.ratio > 0.0) {
            diag.add_error_with_entity(
                "tap",
                &format!("tap ratio must be positive (got {})", tap.ratio),
                &entity,
            );
        }
    }
}

fn validate_limits(network: &Network, input: &SolveInput, diag: &mut Diagnostics) {
    for limit in &input.voltage_limits {
        let entity = bus_entity(limit.bus);
        if !network.contains_bus(limit.bus) {
            diag.add_error_with_entity("reference", "voltage limit on an unknown bus", &entity);
        }
        if !(limit.vmin_pu <= limit.vmax_pu) {
            diag.add_error_with_entity(
                "limit",
                &format!("vmin ({}) exceeds vmax ({})", limit.vmin_pu, limit.vmax_pu),
                &entity,
            );
        }
    }

    for limit in &input.branch_limits {
        let entity = format!("branch {}", limit.branch);
        if network.branch(limit.branch).is_none() {
            diag.add_error_with_entity("reference", "branch limit on an unknown branch", &entity);
        }
        for value in [limit.max_mva, limit.max_ka].into_iter().flatten() {
            if !(value.is_finite() && value > 0.0) {
                diag.add_error_with_entity(
                    "limit",
                    &format!("branch limit must be positive (got {value})"),
                    &entity,
                );
            }
        }
    }
}

fn validate_options(options: &SolveOptions, diag: &mut Diagnostics) {
    if !(options.tolerance.is_finite() && options.tolerance > 0.0) {
        diag.add_error(
            "options",
            &format!("tolerance must be positive (got {})", options.tolerance),
        );
    }
    let unit_interval = [
        ("damping", options.damping),
        ("fd_damping_p", options.fd_damping_p),
        ("fd_damping_q", options.fd_damping_q),
    ];
    for (name, value) in unit_interval {
        if !(value > 0.0 && value <= 1.0) {
            diag.add_error("options", &format!("{name} must be in (0, 1] (got {value})"));
        }
    }
    if !(options.acceleration > 0.0 && options.acceleration < 2.0) {
        diag.add_error(
            "options",
            &format!("acceleration must be in (0, 2) (got {})", options.acceleration),
        );
    }
    if !(options.q_limit_activation.is_finite() && options.q_limit_activation >= 0.0) {
        diag.add_error("options", "q_limit_activation must be non-negative");
    }
}

/// Topology tags are informational; flag the ones the specs contradict.
fn validate_type_tags(network: &Network, input: &SolveInput, diag: &mut Diagnostics) {
    let pv_buses: BTreeSet<BusId> = input.pv.iter().map(|g| g.bus).collect();
    for bus in network.buses() {
        let entity = bus_entity(bus.id);
        match bus.kind {
            BusKind::Slack if bus.id != input.slack.bus => diag.add_warning_with_entity(
                "type_tag",
                "bus is tagged slack but another bus is the reference",
                &entity,
            ),
            BusKind::Pv if !pv_buses.contains(&bus.id) && bus.id != input.slack.bus => diag
                .add_warning_with_entity(
                    "type_tag",
                    "bus is tagged PV but has no PV spec; solved as PQ",
                    &entity,
                ),
            _ => {}
        }
    }
}

fn validate_impedances(network: &Network, diag: &mut Diagnostics) {
    for branch in network.branches().filter(|b| b.in_service) {
        let zero = match &branch.kind {
            BranchKind::Line(line) => {
                line.length_km == 0.0 || (line.r_ohm_per_km == 0.0 && line.x_ohm_per_km == 0.0)
            }
            BranchKind::Transformer(tx) => tx.vk_percent == 0.0,
        };
        if zero {
            diag.add_warning_with_entity(
                "impedance",
                "zero series impedance; branch will be left out of the Y-bus",
                &format!("branch {}", branch.id),
            );
        }
    }
}

fn validate_island_membership(network: &Network, input: &SolveInput, diag: &mut Diagnostics) {
    let Some(island) = island_containing(network, input.slack.bus) else {
        return;
    };

    // Per bus, the kinds of spec found there
    let mut outside: BTreeMap<BusId, Vec<&str>> = BTreeMap::new();
    let specs = input
        .pq
        .iter()
        .map(|s| (s.bus, "PQ spec"))
        .chain(input.pv.iter().map(|s| (s.bus, "PV spec")))
        .chain(input.shunts.iter().map(|s| (s.bus, "shunt")));
    for (bus, kind) in specs {
        if network.contains_bus(bus) && !island.contains(&bus) {
            outside.entry(bus).or_default().push(kind);
        }
    }
    for (bus, kinds) in outside {
        diag.add_warning_with_entity(
            "island",
            &format!("{} outside the slack island; not solved", kinds.join(", ")),
            &bus_entity(bus),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_flow::PvSpec;
    use crate::test_utils::{line, radial_feeder, two_bus_case};
    use flowgrid_core::{Branch, BranchId, Bus};

    fn categories(diag: &Diagnostics) -> Vec<&str> {
        diag.errors().map(|issue| issue.category.as_str()).collect()
    }

    #[test]
    fn clean_input_has_no_findings() {
        let (network, input) = two_bus_case();
        let diag = validate_input(&network, &input);
        assert!(diag.is_empty(), "{diag}");
    }

    #[test]
    fn missing_slack_is_an_error() {
        let (network, mut input) = two_bus_case();
        input.slack.bus = BusId::new(99);
        let diag = validate_input(&network, &input);
        assert!(diag.has_errors());
        assert_eq!(diag.for_entity("bus 99").count(), 1);
    }

    #[test]
    fn duplicate_and_conflicting_specs() {
        let (network, input) = two_bus_case();
        let pv = PvSpec {
            bus: BusId::new(1),
            p_mw: 1.0,
            vm_pu: 1.0,
            q_min_mvar: Some(2.0),
            q_max_mvar: Some(1.0),
        };
        let input = input.with_load(BusId::new(2), 1.0, 0.0).with_generator(pv);
        let diag = validate_input(&network, &input);
        let found = categories(&diag);
        assert!(found.contains(&"duplicate"));
        // PV on slack plus q_min > q_max
        assert_eq!(found.iter().filter(|c| **c == "pv").count(), 2);
    }

    #[test]
    fn implausible_slack_voltage_is_a_warning() {
        let (network, input) = two_bus_case();
        let diag = validate_input(&network, &input.with_slack_voltage(1.3, 0.0));
        assert!(!diag.has_errors());
        assert_eq!(diag.warning_count(), 1);
    }

    #[test]
    fn tap_override_on_line_is_rejected() {
        let (network, input) = two_bus_case();
        let diag = validate_input(&network, &input.with_tap(BranchId::new(1), 1.05));
        assert_eq!(categories(&diag), vec!["tap"]);
    }

    #[test]
    fn out_of_range_options() {
        let (network, mut input) = two_bus_case();
        input.options.tolerance = 0.0;
        input.options.acceleration = 2.5;
        let diag = validate_input(&network, &input);
        assert_eq!(diag.error_count(), 2);
    }

    #[test]
    fn inverted_voltage_band() {
        let (network, input) = two_bus_case();
        let diag = validate_input(&network, &input.with_voltage_limit(BusId::new(2), 1.1, 0.9));
        assert_eq!(categories(&diag), vec!["limit"]);
    }

    #[test]
    fn warnings_for_tags_impedance_and_islands() {
        let mut network = radial_feeder(3, line(0.1, 0.3, 1.0), 10.0);
        network
            .add_bus(Bus::new(BusId::new(4), "Tie").with_kind(BusKind::Pv))
            .unwrap();
        network
            .add_bus(Bus::new(BusId::new(5), "Remote"))
            .unwrap();
        network
            .add_branch(Branch::line(
                BranchId::new(7),
                BusId::new(3),
                BusId::new(4),
                line(0.0, 0.0, 1.0),
            ))
            .unwrap();
        let input = SolveInput::new(10.0, BusId::new(1))
            .with_load(BusId::new(5), 1.0, 0.0)
            .with_shunt(BusId::new(5), 0.0, 1.0);

        let diag = validate_input(&network, &input);
        assert!(!diag.has_errors(), "{diag}");
        let warnings: Vec<&str> = diag.warnings().map(|w| w.category.as_str()).collect();
        assert_eq!(warnings, vec!["type_tag", "impedance", "island"]);
        assert!(diag.for_entity("bus 5").any(|w| w.message.contains("PQ spec, shunt")));
    }
}
