//! Semantic color palette for scenario reports.

use isolab::{TaskOutcome, Verdict};
use owo_colors::{OwoColorize, Style};

/// Committed tasks and protected stores.
fn good() -> Style {
    Style::new().green().bold()
}

/// Observed anomalies and fatal failures.
fn bad() -> Style {
    Style::new().red().bold()
}

/// Rolled-back tasks and inconclusive runs.
fn caution() -> Style {
    Style::new().yellow()
}

fn styled(value: &impl std::fmt::Display, style: Style) -> String {
    if super::no_color() {
        value.to_string()
    } else {
        value.style(style).to_string()
    }
}

/// Styles applied by meaning rather than by color.
pub trait SemanticStyle: Sized {
    fn success(&self) -> String;
    fn error(&self) -> String;
    fn warning(&self) -> String;
    /// Cyan.
    fn info(&self) -> String;
    /// Dimmed.
    fn muted(&self) -> String;
    /// Bold.
    fn header(&self) -> String;
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        styled(self, good())
    }

    fn error(&self) -> String {
        styled(self, bad())
    }

    fn warning(&self) -> String {
        styled(self, caution())
    }

    fn info(&self) -> String {
        styled(self, Style::new().cyan())
    }

    fn muted(&self) -> String {
        styled(self, Style::new().dimmed())
    }

    fn header(&self) -> String {
        styled(self, Style::new().bold())
    }
}

/// A verdict, red when the anomaly happened and green when the store held.
pub fn verdict(verdict: &Verdict) -> String {
    let style = match verdict {
        Verdict::AnomalyObserved => bad(),
        Verdict::AnomalyPrevented | Verdict::ConflictDetected => good(),
        Verdict::Inconclusive(_) => caution(),
    };
    styled(verdict, style)
}

/// The short form of how a task ended.
pub fn task_outcome(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Committed => styled(&"committed", good()),
        TaskOutcome::RolledBackOnConflict { .. } => styled(&"rolled back on conflict", caution()),
        TaskOutcome::FailedFatal { .. } => styled(&"failed", bad()),
    }
}
