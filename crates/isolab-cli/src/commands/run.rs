//! Run command - executes scenarios against every configured target.

use std::future::Future;

use anyhow::{Context, Result};
use isolab::{Backend, Orchestrator, RunError, Scenario, Store, TargetContext};
use isolab_config::{IsolabConfig, TargetConfig};

use crate::report::render_outcome;
use crate::style::banner::print_scenario_banner;
use crate::style::{
    finish_and_clear, finish_skipped, print_error, print_hint, print_warn, run_spinner,
};

/// Runs each scenario against each target, one target at a time.
///
/// Unreachable targets and failed preparations are reported and skipped;
/// they never fail the command.
pub fn run(config: &IsolabConfig, scenarios: &[Scenario]) -> Result<()> {
    if config.targets.is_empty() {
        print_warn("No targets configured");
        print_hint("Add [[targets]] to isolab.toml, or set PG_URL and CRDB_URL");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let tally = runtime.block_on(run_suite(scenarios, &config.targets, |target| {
        connect(config, target)
    }));

    if tally.skipped > 0 {
        print_warn(&format!(
            "{} of {} runs skipped",
            tally.skipped,
            tally.completed + tally.skipped
        ));
    }

    Ok(())
}

/// Runs that reported an outcome, and runs that were skipped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    completed: usize,
    skipped: usize,
}

async fn run_suite<'a, S, F, Fut>(
    scenarios: &[Scenario],
    targets: &'a [TargetConfig],
    connect: F,
) -> Tally
where
    S: Store,
    F: Fn(&'a TargetConfig) -> Fut,
    Fut: Future<Output = Result<Orchestrator<S>, RunError>>,
{
    let mut tally = Tally::default();
    for &scenario in scenarios {
        print_scenario_banner(scenario);
        for target in targets {
            if run_target(target, scenario, connect(target)).await {
                tally.completed += 1;
            } else {
                tally.skipped += 1;
            }
        }
    }
    tally
}

async fn connect(
    config: &IsolabConfig,
    target: &TargetConfig,
) -> Result<Orchestrator<Backend>, RunError> {
    let context = TargetContext::new(&target.name).with_isolation(target.isolation);
    let orchestrator =
        Orchestrator::connect(context, &target.url, &config.connect_options(target)).await?;
    Ok(orchestrator
        .with_pacing(config.pacing())
        .with_timing(Scenario::PhantomRead, config.phantom_read)
        .with_timing(Scenario::WriteSkew, config.write_skew)
        .with_floor(config.run.floor))
}

/// Returns true if the run produced an outcome.
async fn run_target<S: Store>(
    target: &TargetConfig,
    scenario: Scenario,
    connecting: impl Future<Output = Result<Orchestrator<S>, RunError>>,
) -> bool {
    let spinner = run_spinner(scenario, &target.name);

    let orchestrator = match connecting.await {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            finish_skipped(&spinner, &target.name);
            report_error(&target.name, &err);
            return false;
        }
    };

    let result = orchestrator.run(scenario).await;
    orchestrator.store().close().await;
    finish_and_clear(&spinner);

    match result {
        Ok(outcome) => {
            println!("{}", render_outcome(&outcome));
            true
        }
        Err(err) => {
            report_error(&target.name, &err);
            false
        }
    }
}

fn report_error(target: &str, err: &RunError) {
    tracing::warn!(store = %target, error = %err, "scenario run skipped");
    print_error(&err.to_string());
    if err.is_schema_prep() {
        print_hint("The target's user needs permission to drop and create tables");
    }
}
