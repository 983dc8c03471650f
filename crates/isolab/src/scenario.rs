//! The two anomaly scenarios and how their runs are judged.

use std::fmt;

use crate::dataset::Dataset;
use crate::pacing::{ScenarioTiming, TaskTiming};
use crate::store::{IsolationLevel, Statement};
use crate::task::{TaskLabel, TaskOutcome, TaskPlan, TaskReport, TaskStep};

/// Price of the accounts task B bills in the phantom read scenario.
pub const PHANTOM_BILLED_PRICE: i64 = 20;

/// Doctor claimed by task A in the write skew scenario.
pub const SKEW_DOCTOR_A: i64 = 1;

/// Doctor claimed by task B in the write skew scenario.
pub const SKEW_DOCTOR_B: i64 = 4;

/// Minimum number of available doctors the write skew scenario protects.
pub const DEFAULT_FLOOR: i64 = 1;

// ============================================================================
// Scenarios
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// A lists unbilled accounts twice; B bills some of them in between.
    PhantomRead,
    /// A and B each read the availability total, then each takes a
    /// different doctor off call if the total looked safe.
    WriteSkew,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhantomRead => "Phantom Read",
            Self::WriteSkew => "Write Skew",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::PhantomRead => {
                "Task A lists unbilled accounts twice while task B bills every account priced 20"
            }
            Self::WriteSkew => {
                "Tasks A and B each check that another doctor is on call, then both go off call"
            }
        }
    }

    pub fn all() -> &'static [Scenario] {
        &[Self::PhantomRead, Self::WriteSkew]
    }

    pub fn dataset(&self) -> Dataset {
        match self {
            Self::PhantomRead => Dataset::Accounts,
            Self::WriteSkew => Dataset::Availability,
        }
    }

    /// Wall-clock delays that place B's write inside A's window.
    pub fn default_timing(&self) -> ScenarioTiming {
        match self {
            Self::PhantomRead => {
                ScenarioTiming::new(TaskTiming::new(0, 2000), TaskTiming::new(500, 0))
            }
            Self::WriteSkew => {
                ScenarioTiming::new(TaskTiming::new(0, 500), TaskTiming::new(100, 500))
            }
        }
    }

    /// The plans of task A and task B.
    pub fn plans(&self, isolation: Option<IsolationLevel>, floor: i64) -> (TaskPlan, TaskPlan) {
        let (a, b) = match self {
            Self::PhantomRead => (
                TaskPlan::new(TaskLabel::A, TaskStep::ListUnbilled).then(TaskStep::ListUnbilled),
                TaskPlan::new(TaskLabel::B, TaskStep::BillAtPrice(PHANTOM_BILLED_PRICE)),
            ),
            Self::WriteSkew => (
                TaskPlan::new(TaskLabel::A, TaskStep::SumAvailable).then(TaskStep::ClaimIfSafe {
                    id: SKEW_DOCTOR_A,
                    floor,
                }),
                TaskPlan::new(TaskLabel::B, TaskStep::SumAvailable).then(TaskStep::ClaimIfSafe {
                    id: SKEW_DOCTOR_B,
                    floor,
                }),
            ),
        };
        (a.with_isolation(isolation), b.with_isolation(isolation))
    }

    /// The aggregate read once both tasks have finished.
    pub fn final_statement(&self) -> Statement {
        match self {
            Self::PhantomRead => Statement::SumUnbilled,
            Self::WriteSkew => Statement::SumAvailable,
        }
    }

    /// Label of the final aggregate, for reports.
    pub fn final_label(&self) -> &'static str {
        match self {
            Self::PhantomRead => "unbilled total",
            Self::WriteSkew => "doctors available",
        }
    }

    /// Decides the verdict of a finished run.
    ///
    /// `final_value` is the post-run aggregate, or the error that kept it
    /// from being read.
    pub fn judge(
        &self,
        task_a: &TaskReport,
        task_b: &TaskReport,
        final_value: Result<i64, &str>,
        floor: i64,
    ) -> Verdict {
        for report in [task_a, task_b] {
            if let TaskOutcome::FailedFatal { phase, error } = &report.outcome {
                return Verdict::Inconclusive(format!(
                    "task {} failed during {phase}: {error}",
                    report.label
                ));
            }
        }
        let final_value = match final_value {
            Ok(value) => value,
            Err(error) => {
                return Verdict::Inconclusive(format!("final read failed: {error}"));
            }
        };

        let anomaly = match self {
            Self::PhantomRead => match task_a.listing_totals().as_slice() {
                [first, second] => first != second,
                _ => false,
            },
            Self::WriteSkew => final_value < floor,
        };

        if anomaly {
            Verdict::AnomalyObserved
        } else if task_a.outcome.is_conflict() || task_b.outcome.is_conflict() {
            Verdict::ConflictDetected
        } else {
            Verdict::AnomalyPrevented
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Verdicts
// ============================================================================

/// The result of one scenario run against one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The anomaly happened.
    AnomalyObserved,
    /// Both tasks committed and the anomaly did not happen.
    AnomalyPrevented,
    /// The store rolled a task back instead of allowing the anomaly.
    ConflictDetected,
    /// A task or the final read failed for a reason other than a conflict.
    Inconclusive(String),
}

impl Verdict {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AnomalyObserved => "ANOMALY OBSERVED",
            Self::AnomalyPrevented => "ANOMALY PREVENTED",
            Self::ConflictDetected => "CONFLICT DETECTED",
            Self::Inconclusive(_) => "INCONCLUSIVE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inconclusive(reason) => write!(f, "{}: {reason}", self.tag()),
            _ => f.write_str(self.tag()),
        }
    }
}
