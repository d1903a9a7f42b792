//! Solve entry points.

use super::ac_pf::NewtonRaphson;
use super::branch_flow::post_process;
use super::fast_decoupled::FastDecoupled;
use super::gauss_seidel::GaussSeidel;
use super::injection::compute_injections;
use super::input::SolveInput;
use super::iteration::{self, SolveContext, SolverState, UpdateRule};
use super::options::{Method, TraceLevel};
use super::result::{assemble, ResultParts, SolveResult};
use crate::error::{PowerFlowError, PowerFlowResult};
use crate::sparse::{AdmittanceBuilder, YBusError};
use crate::validation::validate_input;
use flowgrid_core::{Diagnostics, Network};
use tracing::{info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

fn update_rule(method: Method) -> Box<dyn UpdateRule> {
    match method {
        Method::NewtonRaphson => Box::new(NewtonRaphson),
        Method::GaussSeidel => Box::new(GaussSeidel),
        Method::FastDecoupled => Box::new(FastDecoupled::new()),
    }
}

/// Solve one case on `network`.
///
/// Returns `Err` only for setup problems (validation errors, a slack bus
/// outside the topology). Non-convergence and singular matrices are reported
/// in the result.
pub fn solve(network: &Network, input: &SolveInput) -> PowerFlowResult<SolveResult> {
    let options = &input.options;
    info!(
        method = %options.method,
        slack = %input.slack.bus,
        buses = network.stats().num_buses,
        "starting power flow"
    );

    let validation = if options.validate {
        let diag = validate_input(network, input);
        if diag.has_errors() {
            warn!(findings = %diag, "pre-solve validation failed");
            return Err(PowerFlowError::ValidationFailed(diag));
        }
        diag
    } else {
        Diagnostics::new()
    };

    let mut model = AdmittanceBuilder::new(network, input.slack.bus, input.base_mva)
        .with_shunts(&input.shunts)
        .with_taps(&input.tap_overrides)
        .build()
        .map_err(|err| match err {
            YBusError::SlackNotFound(slack) => PowerFlowError::SlackIslandNotFound { slack },
            YBusError::InvalidBaseMva(_) => {
                let mut diag = validation.clone();
                diag.add_error("input", &err.to_string());
                PowerFlowError::ValidationFailed(diag)
            }
        })?;
    if options.trace == TraceLevel::Full {
        model.trace.entries = Some(model.ybus.entries());
    }

    let state = SolverState::initial(network, &model, input);
    let initial_injections = compute_injections(&model.ybus, &state.voltages);
    let initial_state = state.snapshot(&model.ybus, &initial_injections);

    let ctx = SolveContext {
        model: &model,
        options,
        backend: options.linear_solver.build_solver(),
        base_mva: input.base_mva,
    };
    let mut rule = update_rule(options.method);
    let driver = iteration::run(rule.as_mut(), &ctx, state);

    let post = post_process(
        network,
        &model,
        input,
        &driver.state.voltages,
        &driver.injections,
        &driver.state.classes,
    );

    let result = assemble(ResultParts {
        input,
        validation,
        model,
        initial_state,
        driver,
        post,
    });
    info!(
        method = %result.method,
        outcome = ?result.outcome,
        iterations = result.iterations,
        max_mismatch = result.final_mismatch,
        violations = result.violations.len(),
        "power flow finished"
    );
    Ok(result)
}

/// Solve independent cases against one shared network.
///
/// Results come back in input order. Cases run in parallel when the
/// `parallel` feature is enabled.
pub fn solve_batch(
    network: &Network,
    inputs: &[SolveInput],
) -> Vec<PowerFlowResult<SolveResult>> {
    #[cfg(feature = "parallel")]
    {
        inputs.par_iter().map(|input| solve(network, input)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        inputs.iter().map(|input| solve(network, input)).collect()
    }
}
