//! Anomaly Reporter: renders a scenario outcome for the terminal.
//!
//! Rendering is pure; callers decide where the text goes.

use isolab::{
    Dataset, Observation, Scenario, ScenarioOutcome, SeedSnapshot, TaskLabel, TaskOutcome,
    TaskReport, Value, Verdict,
};

use crate::style::colors::{self, SemanticStyle};
use crate::style::table::rows_table;

/// Renders everything observed in one run against one target.
pub fn render_outcome(outcome: &ScenarioOutcome) -> String {
    let isolation = outcome
        .isolation
        .map_or_else(|| "store default".to_string(), |level| level.to_string());

    let mut lines = vec![
        format!(
            "{} {} {}",
            "▸".info(),
            outcome.target.header(),
            format!("(isolation: {isolation})").muted()
        ),
        format!("  {}", "Seed state:".muted()),
        render_seed(&outcome.seed),
    ];

    for report in [&outcome.task_a, &outcome.task_b] {
        lines.extend(render_task(report));
    }

    let final_value = outcome
        .final_value
        .map_or_else(|| "unavailable".to_string(), |v| v.to_string());
    lines.push(format!(
        "  Final {}: {}",
        outcome.scenario.final_label(),
        final_value.header()
    ));
    lines.push(format!("  Verdict: {}", colors::verdict(&outcome.verdict)));
    if let Some(explanation) = explain(outcome) {
        lines.push(format!("  {}", explanation.muted()));
    }
    lines.push(format!(
        "  {}",
        format!("finished in {:.2?}", outcome.elapsed).muted()
    ));
    lines.push(String::new());

    lines.join("\n")
}

fn render_seed(seed: &SeedSnapshot) -> String {
    let rows: Vec<Vec<String>> = seed
        .rows
        .iter()
        .map(|row| {
            row.values()
                .iter()
                .enumerate()
                .map(|(index, value)| cell(seed.dataset, index, value))
                .collect()
        })
        .collect();
    rows_table(seed.columns(), &rows).to_string()
}

/// Flags read as yes/no; `isAvailable` is stored as an integer so it sums.
fn cell(dataset: Dataset, index: usize, value: &Value) -> String {
    let flag = match (dataset, index, value) {
        (_, _, Value::Bool(flag)) => Some(*flag),
        (Dataset::Availability, 2, Value::Int(n)) => Some(*n != 0),
        _ => None,
    };
    match flag {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => value.to_string(),
    }
}

fn render_task(report: &TaskReport) -> Vec<String> {
    let mut lines = vec![format!(
        "  Task {} {}",
        report.label.to_string().header(),
        format!("({:.2?})", report.elapsed).muted()
    )];
    for observation in &report.observations {
        lines.push(format!("    {}", describe_observation(observation)));
    }
    lines.push(format!("    {}", describe_task_outcome(&report.outcome)));
    lines
}

fn describe_observation(observation: &Observation) -> String {
    match observation {
        Observation::Listing { rows, total } => {
            let ids: Vec<String> = rows.iter().map(|(id, _)| id.to_string()).collect();
            format!(
                "listed {} unbilled accounts [{}], total {total}",
                rows.len(),
                ids.join(", ")
            )
        }
        Observation::Billed { price, rows } => {
            format!("billed {rows} accounts priced {price}")
        }
        Observation::Availability { total } => format!("saw {total} doctors available"),
        Observation::Claimed { id } => format!("took doctor {id} off call"),
        Observation::Declined { id, total } => {
            format!("kept doctor {id} on call ({total} available is not enough)")
        }
    }
}

fn describe_task_outcome(outcome: &TaskOutcome) -> String {
    let summary = colors::task_outcome(outcome);
    match outcome {
        TaskOutcome::Committed => summary,
        TaskOutcome::RolledBackOnConflict {
            phase,
            code,
            message,
        } => format!("{summary} during {phase} (SQLSTATE {code}: {message})"),
        TaskOutcome::FailedFatal { phase, error } => format!("{summary} during {phase}: {error}"),
    }
}

/// One sentence on why the verdict was reached.
fn explain(outcome: &ScenarioOutcome) -> Option<String> {
    let conflicted = [&outcome.task_a, &outcome.task_b]
        .into_iter()
        .find(|r| r.outcome.is_conflict())
        .map(|r| r.label);

    match (outcome.scenario, &outcome.verdict) {
        (Scenario::PhantomRead, Verdict::AnomalyObserved) => {
            let totals = outcome.task_a.listing_totals();
            Some(format!(
                "Task A's second read saw task B's committed update: total went from {} to {}",
                totals.first()?,
                totals.last()?
            ))
        }
        (Scenario::PhantomRead, Verdict::AnomalyPrevented) => Some(format!(
            "Task A read the same total twice ({}); task B's update stayed invisible to it",
            outcome.task_a.listing_totals().first()?
        )),
        (Scenario::WriteSkew, Verdict::AnomalyObserved) => Some(format!(
            "Both tasks saw {} doctors available and went off call; {} left",
            outcome.task_a.last_availability()?,
            outcome.final_value?
        )),
        (Scenario::WriteSkew, Verdict::AnomalyPrevented) => {
            Some("At least one task saw the other's claim and stayed on call".to_string())
        }
        (_, Verdict::ConflictDetected) => Some(format!(
            "The store rolled back task {} instead of allowing the anomaly",
            conflicted.unwrap_or(TaskLabel::A)
        )),
        (_, Verdict::Inconclusive(_)) => None,
    }
}
