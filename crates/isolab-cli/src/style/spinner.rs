//! Progress spinner shown while a scenario runs against one target.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use isolab::Scenario;

const SPINNER: &[&str] = &["◇ ", "◆ ", "◇ ", "◆ "];

/// Starts the spinner for `scenario` against `target`.
///
/// indicatif draws on stderr and stays hidden when it is not a terminal,
/// so the spinner never interleaves with the report on stdout.
pub fn run_spinner(scenario: Scenario, target: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();

    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(SPINNER)
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .expect("invalid spinner template"),
    );

    pb.set_message(format!("{scenario} against {target}"));
    pb.enable_steady_tick(Duration::from_millis(120));

    pb
}

/// Leaves a failure mark for a target that never ran.
pub fn finish_skipped(pb: &ProgressBar, target: &str) {
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix} {msg}")
            .expect("invalid spinner template"),
    );
    pb.set_prefix("✗");
    pb.finish_with_message(format!("{target} skipped"));
}

/// Removes the spinner so the report starts on a clean line.
pub fn finish_and_clear(pb: &ProgressBar) {
    pb.finish_and_clear();
}
