//! Setup errors, configuration loading, violations and batch solving

use flowgrid_algo::power_flow::ElementRef;
use flowgrid_algo::{
    solve, solve_batch, ConfigError, Method, PowerFlowError, PowerFlowResult, SolveInput,
    SolveOptions, TraceLevel, ViolationKind,
};
use flowgrid_core::solver::LinearSolverKind;
use flowgrid_core::{Branch, BranchId, Bus, BusId, LineParams, Network};
use std::io::Write;

fn two_bus() -> Network {
    let mut network = Network::new();
    network
        .add_bus(Bus::new(BusId::new(1), "A").with_base_kv(10.0))
        .unwrap();
    network
        .add_bus(Bus::new(BusId::new(2), "B").with_base_kv(10.0))
        .unwrap();
    network
        .add_branch(Branch::line(
            BranchId::new(1),
            BusId::new(1),
            BusId::new(2),
            LineParams {
                r_ohm_per_km: 0.4,
                x_ohm_per_km: 0.8,
                length_km: 1.0,
                ..LineParams::default()
            },
        ))
        .unwrap();
    network
}

#[test]
fn invalid_input_fails_before_iterating() {
    let network = two_bus();
    let input = SolveInput::new(10.0, BusId::new(1))
        .with_load(BusId::new(2), 1.0, 0.5)
        .with_load(BusId::new(2), 0.5, 0.1)
        .with_load(BusId::new(8), 1.0, 0.0);

    let err = solve(&network, &input).unwrap_err();
    let diag = err.diagnostics().expect("validation failure");
    assert!(diag.error_count() >= 2, "{diag}");
    assert!(diag.errors().any(|issue| issue.category == "duplicate"));
    assert!(diag.for_entity("bus 8").next().is_some());
    assert!(err.to_string().contains("validation failed"));
}

#[test]
fn slack_outside_topology_is_its_own_error() {
    let network = two_bus();
    let mut options = SolveOptions::default();
    options.validate = false;
    let input = SolveInput::new(10.0, BusId::new(42)).with_options(options);

    match solve(&network, &input) {
        Err(PowerFlowError::SlackIslandNotFound { slack }) => assert_eq!(slack, BusId::new(42)),
        other => panic!("expected SlackIslandNotFound, got {other:?}"),
    }
}

#[test]
fn warnings_travel_into_the_result() {
    let network = two_bus();
    let input = SolveInput::new(10.0, BusId::new(1))
        .with_slack_voltage(1.25, 0.0)
        .with_load(BusId::new(2), 1.0, 0.5);

    let result = solve(&network, &input).unwrap();
    assert!(result.converged);
    assert!(!result.trace.validation.has_errors());
    assert!(result.trace.validation.warning_count() >= 1);
}

#[test]
fn options_load_from_toml_file() {
    let mut file = tempfile_path("flowgrid-options.toml");
    writeln!(
        file.1,
        r#"
method = "fast_decoupled"
tolerance = 1e-8
fd_variant = "bx"
trace = "summary"
linear_solver = "gauss"
"#
    )
    .unwrap();
    drop(file.1);

    let options = SolveOptions::load_from(&file.0).unwrap();
    std::fs::remove_file(&file.0).unwrap();

    assert_eq!(options.method, Method::FastDecoupled);
    assert_eq!(options.tolerance, 1e-8);
    assert_eq!(options.trace, TraceLevel::Summary);
    assert_eq!(options.linear_solver, LinearSolverKind::Gauss);
    assert_eq!(options.max_iterations(), 50);

    let result = solve(
        &two_bus(),
        &SolveInput::new(10.0, BusId::new(1))
            .with_load(BusId::new(2), 2.0, 1.0)
            .with_options(options),
    )
    .unwrap();
    assert!(result.converged);
    assert!(result.final_mismatch < 1e-8);
    assert_eq!(result.trace.iterations.len(), 1);
}

#[test]
fn missing_options_file_is_a_config_error() {
    let err = SolveOptions::load_from(std::path::Path::new("/nonexistent/flowgrid.toml"))
        .unwrap_err();
    let err = PowerFlowError::from(err);
    assert!(matches!(err, PowerFlowError::Config(_)));
}

fn load_and_solve(network: &Network, options_path: &std::path::Path) -> PowerFlowResult<bool> {
    let options = SolveOptions::load_from(options_path)?;
    let input = SolveInput::new(10.0, BusId::new(1))
        .with_load(BusId::new(2), 1.0, 0.5)
        .with_options(options);
    Ok(solve(network, &input)?.converged)
}

#[test]
fn loading_and_solving_chain_through_one_error_type() {
    let network = two_bus();
    let err = load_and_solve(&network, std::path::Path::new("/nonexistent/flowgrid.toml"))
        .unwrap_err();
    assert!(matches!(err, PowerFlowError::Config(ConfigError::Io { .. })));
    assert!(err.to_string().contains("/nonexistent/flowgrid.toml"));

    let mut file = tempfile_path("flowgrid-chain.toml");
    writeln!(file.1, "method = \"gauss_seidel\"").unwrap();
    drop(file.1);
    let converged = load_and_solve(&network, &file.0);
    std::fs::remove_file(&file.0).unwrap();
    assert!(converged.unwrap());
}

#[test]
fn input_loads_from_json() {
    let json = r#"{
        "base_mva": 10.0,
        "slack": { "bus": 1 },
        "pq": [ { "bus": 2, "p_mw": 2.0, "q_mvar": 1.0 } ],
        "branch_limits": [ { "branch": 1, "max_mva": 1.5 } ],
        "options": { "method": "gauss_seidel", "acceleration": 1.2 }
    }"#;
    let input = SolveInput::from_json_str(json).unwrap();
    assert_eq!(input.slack.vm_pu, 1.0);
    assert_eq!(input.options.method, Method::GaussSeidel);

    let result = solve(&two_bus(), &input).unwrap();
    assert!(result.converged);
    assert_eq!(result.violations.len(), 1);
    let violation = &result.violations[0];
    assert_eq!(violation.kind, ViolationKind::BranchMva);
    assert_eq!(violation.element, ElementRef::Branch(BranchId::new(1)));
    assert!(violation.severity > 1.0);
    assert_eq!(result.violation_summary.count, 1);
    assert!(result.branches[0].loading_percent.unwrap() > 100.0);

    // The result round-trips through JSON unchanged
    let text = serde_json::to_string(&result).unwrap();
    let back: flowgrid_algo::SolveResult = serde_json::from_str(&text).unwrap();
    assert_eq!(back.buses, result.buses);
    assert_eq!(back.violations, result.violations);
}

#[test]
fn catalog_limits_flag_undervoltage() {
    let mut network = Network::new();
    network
        .add_bus(Bus::new(BusId::new(1), "A").with_base_kv(10.0))
        .unwrap();
    network
        .add_bus(
            Bus::new(BusId::new(2), "B")
                .with_base_kv(10.0)
                .with_voltage_limits(0.995, 1.05),
        )
        .unwrap();
    network
        .add_branch(
            Branch::line(
                BranchId::new(1),
                BusId::new(1),
                BusId::new(2),
                LineParams {
                    r_ohm_per_km: 0.4,
                    x_ohm_per_km: 0.8,
                    length_km: 1.0,
                    ..LineParams::default()
                },
            )
            .with_rating_ka(0.5),
        )
        .unwrap();
    let input = SolveInput::new(10.0, BusId::new(1)).with_load(BusId::new(2), 2.0, 1.0);

    let result = solve(&network, &input).unwrap();
    assert_eq!(result.violations.len(), 1);
    let violation = &result.violations[0];
    assert_eq!(violation.kind, ViolationKind::Undervoltage);
    assert!((violation.severity - 0.995 / violation.value).abs() < 1e-12);
    assert_eq!(result.violation_summary.by_kind[&ViolationKind::Undervoltage], 1);
}

#[test]
fn batch_solves_each_case_independently() {
    let network = two_bus();
    let inputs: Vec<SolveInput> = [0.5, 1.0, 2.0, 4.0]
        .iter()
        .map(|&p| SolveInput::new(10.0, BusId::new(1)).with_load(BusId::new(2), p, p / 2.0))
        .chain(std::iter::once(SolveInput::new(10.0, BusId::new(9))))
        .collect();

    let results = solve_batch(&network, &inputs);
    assert_eq!(results.len(), 5);
    let voltages: Vec<f64> = results[..4]
        .iter()
        .map(|r| r.as_ref().unwrap().buses[1].vm_pu)
        .collect();
    assert!(voltages.windows(2).all(|w| w[0] > w[1]), "{voltages:?}");
    assert!(results[4].is_err());

    // Same answers as solving one by one
    let single = solve(&network, &inputs[2]).unwrap();
    assert_eq!(results[2].as_ref().unwrap(), &single);
}

fn tempfile_path(name: &str) -> (std::path::PathBuf, std::fs::File) {
    let path = std::env::temp_dir().join(format!("{}-{name}", std::process::id()));
    let file = std::fs::File::create(&path).unwrap();
    (path, file)
}
