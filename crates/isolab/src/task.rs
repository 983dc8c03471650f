//! Timed Transaction Task.
//!
//! A task runs one store transaction: begin, first step, interleaving
//! window, optional second step, commit. Whatever happens, it returns a
//! [`TaskReport`]; store errors never escape as `Err` or panics.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::error::StoreError;
use crate::pacing::Pacer;
use crate::store::{IsolationLevel, Session, Statement, Store};

// ============================================================================
// Plans
// ============================================================================

/// Which of the two tasks of a run this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLabel {
    A,
    B,
}

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::B => "B",
        })
    }
}

/// One read or read-then-write inside a task's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    /// Lists unbilled accounts and totals their prices.
    ListUnbilled,
    /// Bills every account at `price`.
    BillAtPrice(i64),
    /// Reads the number of available doctors.
    SumAvailable,
    /// Marks doctor `id` unavailable if the last availability read was
    /// above `floor`.
    ClaimIfSafe { id: i64, floor: i64 },
}

/// What a task does, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    pub label: TaskLabel,
    /// Overrides the store's default isolation level.
    pub isolation: Option<IsolationLevel>,
    pub first: TaskStep,
    pub second: Option<TaskStep>,
}

impl TaskPlan {
    pub fn new(label: TaskLabel, first: TaskStep) -> Self {
        Self {
            label,
            isolation: None,
            first,
            second: None,
        }
    }

    pub fn then(mut self, step: TaskStep) -> Self {
        self.second = Some(step);
        self
    }

    pub fn with_isolation(mut self, isolation: Option<IsolationLevel>) -> Self {
        self.isolation = isolation;
        self
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Where in its transaction a task was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    FirstStep,
    SecondStep,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin",
            Self::FirstStep => "first step",
            Self::SecondStep => "second step",
            Self::Commit => "commit",
        })
    }
}

/// A value a task saw or an effect it had, in step order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Unbilled accounts as `(id, price)` and the sum of their prices.
    Listing { rows: Vec<(i64, i64)>, total: i64 },
    /// Accounts at `price` were billed.
    Billed { price: i64, rows: u64 },
    /// Number of available doctors.
    Availability { total: i64 },
    /// Doctor `id` was marked unavailable.
    Claimed { id: i64 },
    /// Doctor `id` was left available because `total` was not above the floor.
    Declined { id: i64, total: i64 },
}

/// How a task's transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Committed,
    /// The store refused to serialize the transaction; it was rolled back
    /// and not retried.
    RolledBackOnConflict {
        phase: Phase,
        code: String,
        message: String,
    },
    /// Any other failure. Makes the run inconclusive.
    FailedFatal { phase: Phase, error: String },
}

impl TaskOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::RolledBackOnConflict { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FailedFatal { .. })
    }

    fn from_error(phase: Phase, err: StoreError) -> Self {
        match err {
            StoreError::Conflict { code, message } => Self::RolledBackOnConflict {
                phase,
                code,
                message,
            },
            other => Self::FailedFatal {
                phase,
                error: other.to_string(),
            },
        }
    }
}

/// Everything one task observed, and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub label: TaskLabel,
    pub observations: Vec<Observation>,
    pub outcome: TaskOutcome,
    pub elapsed: Duration,
}

impl TaskReport {
    /// Totals of every listing, in read order.
    pub fn listing_totals(&self) -> Vec<i64> {
        self.observations
            .iter()
            .filter_map(|o| match o {
                Observation::Listing { total, .. } => Some(*total),
                _ => None,
            })
            .collect()
    }

    /// The most recent availability read, if any.
    pub fn last_availability(&self) -> Option<i64> {
        last_availability(&self.observations)
    }

    /// A report for a task that never returned (it panicked or was aborted).
    pub fn lost(label: TaskLabel, error: impl fmt::Display) -> Self {
        Self {
            label,
            observations: Vec::new(),
            outcome: TaskOutcome::FailedFatal {
                phase: Phase::Begin,
                error: format!("task did not complete: {error}"),
            },
            elapsed: Duration::ZERO,
        }
    }
}

fn last_availability(observations: &[Observation]) -> Option<i64> {
    observations.iter().rev().find_map(|o| match o {
        Observation::Availability { total } => Some(*total),
        _ => None,
    })
}

// ============================================================================
// Execution
// ============================================================================

/// Runs `plan` against `store`, paced by `pacer`.
///
/// The pacer's `finish` is always reached, so the sibling task is never
/// left waiting on a gate.
#[instrument(skip_all, fields(task = %plan.label, store = %store_name))]
pub async fn run_task<S: Store>(
    store: S,
    plan: TaskPlan,
    mut pacer: Pacer,
    store_name: Arc<str>,
) -> TaskReport {
    pacer.before_begin().await;

    let started = Instant::now();
    let mut observations = Vec::new();
    let outcome = transact(&store, &plan, &mut pacer, &mut observations).await;
    let elapsed = started.elapsed();

    match &outcome {
        TaskOutcome::Committed => tracing::info!(?elapsed, "task committed"),
        TaskOutcome::RolledBackOnConflict { phase, code, .. } => {
            tracing::info!(%phase, code = %code, "task rolled back on serialization conflict");
        }
        TaskOutcome::FailedFatal { phase, error } => {
            tracing::error!(%phase, %error, "task failed");
        }
    }

    pacer.finish().await;

    TaskReport {
        label: plan.label,
        observations,
        outcome,
        elapsed,
    }
}

async fn transact<S: Store>(
    store: &S,
    plan: &TaskPlan,
    pacer: &mut Pacer,
    observations: &mut Vec<Observation>,
) -> TaskOutcome {
    let mut session = match store.begin(plan.isolation).await {
        Ok(session) => session,
        Err(e) => return TaskOutcome::from_error(Phase::Begin, e),
    };
    tracing::debug!(isolation = ?plan.isolation, "transaction opened");

    if let Err(e) = apply(&mut session, plan.first, observations).await {
        return abort(session, Phase::FirstStep, e).await;
    }

    pacer.interleave().await;

    if let Some(step) = plan.second {
        if let Err(e) = apply(&mut session, step, observations).await {
            return abort(session, Phase::SecondStep, e).await;
        }
    }

    match session.commit().await {
        Ok(()) => TaskOutcome::Committed,
        // A failed commit has already ended the transaction.
        Err(e) => TaskOutcome::from_error(Phase::Commit, e),
    }
}

async fn apply<T: Session>(
    session: &mut T,
    step: TaskStep,
    observations: &mut Vec<Observation>,
) -> Result<(), StoreError> {
    let observation = match step {
        TaskStep::ListUnbilled => {
            let rows = session.query_rows(&Statement::ListUnbilled).await?;
            let rows = rows
                .iter()
                .map(|row| Ok((row.int(0)?, row.int(1)?)))
                .collect::<Result<Vec<_>, StoreError>>()?;
            let total = rows.iter().map(|(_, price)| price).sum();
            Observation::Listing { rows, total }
        }
        TaskStep::BillAtPrice(price) => {
            let rows = session.execute(&Statement::BillAtPrice(price)).await?;
            Observation::Billed { price, rows }
        }
        TaskStep::SumAvailable => {
            let total = session.query_scalar(&Statement::SumAvailable).await?;
            Observation::Availability { total }
        }
        TaskStep::ClaimIfSafe { id, floor } => {
            let total = match last_availability(observations) {
                Some(total) => total,
                None => session.query_scalar(&Statement::SumAvailable).await?,
            };
            if total > floor {
                session.execute(&Statement::MarkUnavailable(id)).await?;
                Observation::Claimed { id }
            } else {
                Observation::Declined { id, total }
            }
        }
    };

    tracing::debug!(?observation, "step complete");
    observations.push(observation);
    Ok(())
}

async fn abort<T: Session>(session: T, phase: Phase, err: StoreError) -> TaskOutcome {
    if let Err(rollback) = session.rollback().await {
        tracing::warn!(%phase, error = %rollback, "rollback failed");
    }
    TaskOutcome::from_error(phase, err)
}
