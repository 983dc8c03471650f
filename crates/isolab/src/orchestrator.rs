//! Isolation Scenario Orchestrator.
//!
//! Runs one scenario against one store: reset the dataset, launch task A
//! then task B on the runtime's worker threads, wait for both, read the
//! post-condition and judge it. The orchestrator takes no locks of its own;
//! whatever consistency the tasks see is the store's.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::dataset::{self, SeedSnapshot};
use crate::error::RunError;
use crate::pacing::{self, PacingMode, ScenarioTiming};
use crate::scenario::{DEFAULT_FLOOR, Scenario, Verdict};
use crate::store::{Backend, ConnectOptions, IsolationLevel, Store};
use crate::task::{TaskLabel, TaskReport, run_task};

/// The store a run targets, as named in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetContext {
    pub name: String,
    /// Isolation requested for both tasks; `None` uses the store default.
    pub isolation: Option<IsolationLevel>,
}

impl TargetContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            isolation: None,
        }
    }

    pub fn with_isolation(mut self, isolation: Option<IsolationLevel>) -> Self {
        self.isolation = isolation;
        self
    }
}

/// Everything observed during one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub target: String,
    pub isolation: Option<IsolationLevel>,
    pub seed: SeedSnapshot,
    pub task_a: TaskReport,
    pub task_b: TaskReport,
    /// The post-run aggregate; `None` if it could not be read.
    pub final_value: Option<i64>,
    pub verdict: Verdict,
    pub elapsed: Duration,
}

/// Drives scenario runs against a single store.
#[derive(Debug, Clone)]
pub struct Orchestrator<S: Store> {
    store: S,
    target: TargetContext,
    pacing: PacingMode,
    phantom_read: ScenarioTiming,
    write_skew: ScenarioTiming,
    floor: i64,
}

impl Orchestrator<Backend> {
    /// Opens the store at `url` and wraps it for `target`.
    pub async fn connect(
        target: TargetContext,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<Self, RunError> {
        let store = Backend::open(url, options)
            .await
            .map_err(|source| RunError::Connection {
                target: target.name.clone(),
                source,
            })?;
        tracing::info!(store = %target.name, backend = store.kind(), "connected");
        Ok(Self::new(store, target))
    }
}

impl<S: Store> Orchestrator<S> {
    pub fn new(store: S, target: TargetContext) -> Self {
        Self {
            store,
            target,
            pacing: PacingMode::default(),
            phantom_read: Scenario::PhantomRead.default_timing(),
            write_skew: Scenario::WriteSkew.default_timing(),
            floor: DEFAULT_FLOOR,
        }
    }

    pub fn with_pacing(mut self, pacing: PacingMode) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_timing(mut self, scenario: Scenario, timing: ScenarioTiming) -> Self {
        match scenario {
            Scenario::PhantomRead => self.phantom_read = timing,
            Scenario::WriteSkew => self.write_skew = timing,
        }
        self
    }

    pub fn with_floor(mut self, floor: i64) -> Self {
        self.floor = floor;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn timing(&self, scenario: Scenario) -> ScenarioTiming {
        match scenario {
            Scenario::PhantomRead => self.phantom_read,
            Scenario::WriteSkew => self.write_skew,
        }
    }

    /// Runs `scenario` once.
    ///
    /// Only dataset preparation can fail the run; task failures are folded
    /// into the outcome's verdict.
    #[instrument(skip(self), fields(store = %self.target.name))]
    pub async fn run(&self, scenario: Scenario) -> Result<ScenarioOutcome, RunError> {
        let started = Instant::now();

        let seed = dataset::prepare(&self.store, &self.target.name, scenario.dataset()).await?;

        let (plan_a, plan_b) = scenario.plans(self.target.isolation, self.floor);
        let (pacer_a, pacer_b) = pacing::pair(self.pacing, self.timing(scenario));
        let name: Arc<str> = Arc::from(self.target.name.as_str());

        tracing::info!(pacing = ?self.pacing, isolation = ?self.target.isolation, "launching tasks");
        let task_a = tokio::spawn(run_task(
            self.store.clone(),
            plan_a,
            pacer_a,
            Arc::clone(&name),
        ));
        let task_b = tokio::spawn(run_task(self.store.clone(), plan_b, pacer_b, name));

        // A task that panics never reaches its last gate; abort its sibling
        // rather than leave it waiting.
        let abort_a = task_a.abort_handle();
        let abort_b = task_b.abort_handle();
        let (task_a, task_b) = tokio::join!(
            async {
                let joined = task_a.await;
                if joined.is_err() {
                    abort_b.abort();
                }
                joined
            },
            async {
                let joined = task_b.await;
                if joined.is_err() {
                    abort_a.abort();
                }
                joined
            },
        );
        let task_a = task_a.unwrap_or_else(|e| TaskReport::lost(TaskLabel::A, e));
        let task_b = task_b.unwrap_or_else(|e| TaskReport::lost(TaskLabel::B, e));

        let final_read = self
            .store
            .query_scalar(&scenario.final_statement())
            .await
            .map_err(|e| e.to_string());
        if let Err(error) = &final_read {
            tracing::error!(%error, "final read failed");
        }

        let verdict = scenario.judge(
            &task_a,
            &task_b,
            final_read.as_ref().copied().map_err(String::as_str),
            self.floor,
        );
        tracing::info!(%verdict, final_value = ?final_read.as_ref().ok(), "scenario finished");

        Ok(ScenarioOutcome {
            scenario,
            target: self.target.name.clone(),
            isolation: self.target.isolation,
            seed,
            task_a,
            task_b,
            final_value: final_read.ok(),
            verdict,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::store::MemoryStore;

    #[test]
    fn builder_overrides_one_scenario_timing() {
        let store = MemoryStore::new(IsolationLevel::ReadCommitted);
        let timing = ScenarioTiming::default();
        let orchestrator = Orchestrator::new(store, TargetContext::new("memory"))
            .with_timing(Scenario::WriteSkew, timing)
            .with_floor(2);

        assert_eq!(orchestrator.timing(Scenario::WriteSkew), timing);
        assert_eq!(
            orchestrator.timing(Scenario::PhantomRead),
            Scenario::PhantomRead.default_timing()
        );
        assert_eq!(orchestrator.floor, 2);
    }

    #[tokio::test]
    async fn connect_failure_names_the_target() {
        let target = TargetContext::new("Nowhere");
        let err = Orchestrator::<Backend>::connect(target, "mysql://localhost", &ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Connection { ref target, .. } if target == "Nowhere"));
        assert!(!err.is_schema_prep());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn outcome_records_the_seed_it_started_from() {
        let store = MemoryStore::new(IsolationLevel::RepeatableRead);
        let outcome = Orchestrator::new(store, TargetContext::new("memory"))
            .with_pacing(PacingMode::Lockstep)
            .run(Scenario::WriteSkew)
            .await
            .unwrap();

        assert_eq!(outcome.seed.rows, Dataset::Availability.seed_rows());
        assert_eq!(outcome.target, "memory");
        assert_eq!(outcome.task_a.label, TaskLabel::A);
        assert_eq!(outcome.task_b.label, TaskLabel::B);
    }
}
