//! End-to-end scenario runs against the in-memory store.
//!
//! Lockstep pacing makes every interleaving here deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use isolab::store::MemorySession;
use isolab::{
    Dataset, IsolationLevel, MemoryStore, Observation, Orchestrator, PacingMode, Phase, PrepStep,
    Row, RunError, Scenario, ScenarioOutcome, ScenarioTiming, Statement, Store, StoreError,
    StoreResult, TargetContext, TaskOutcome, TaskTiming, Verdict,
};
use test_case::test_case;

async fn run_lockstep(isolation: IsolationLevel, scenario: Scenario) -> ScenarioOutcome {
    let store = MemoryStore::new(isolation);
    Orchestrator::new(store, TargetContext::new("memory"))
        .with_pacing(PacingMode::Lockstep)
        .run(scenario)
        .await
        .expect("scenario run")
}

// ============================================================================
// Phantom Read
// ============================================================================

#[test_case(IsolationLevel::ReadCommitted, Verdict::AnomalyObserved, 40; "read committed")]
#[test_case(IsolationLevel::RepeatableRead, Verdict::AnomalyPrevented, 100; "repeatable read")]
#[test_case(IsolationLevel::Serializable, Verdict::AnomalyPrevented, 100; "serializable")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn phantom_read(isolation: IsolationLevel, expected: Verdict, second_total: i64) {
    let outcome = run_lockstep(isolation, Scenario::PhantomRead).await;

    assert_eq!(outcome.task_a.listing_totals(), vec![100, second_total]);
    assert_eq!(outcome.task_a.outcome, TaskOutcome::Committed);
    assert_eq!(outcome.task_b.outcome, TaskOutcome::Committed);
    assert_eq!(
        outcome.task_b.observations,
        vec![Observation::Billed { price: 20, rows: 3 }]
    );
    // B's bill always lands, whatever A saw.
    assert_eq!(outcome.final_value, Some(40));
    assert_eq!(outcome.verdict, expected);
}

// ============================================================================
// Write Skew
// ============================================================================

#[test_case(IsolationLevel::ReadCommitted; "read committed")]
#[test_case(IsolationLevel::RepeatableRead; "repeatable read")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_skew_is_observed_below_serializable(isolation: IsolationLevel) {
    let outcome = run_lockstep(isolation, Scenario::WriteSkew).await;

    for report in [&outcome.task_a, &outcome.task_b] {
        assert_eq!(report.last_availability(), Some(2));
        assert_eq!(report.outcome, TaskOutcome::Committed);
    }
    assert_eq!(outcome.final_value, Some(0));
    assert_eq!(outcome.verdict, Verdict::AnomalyObserved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_skew_conflicts_under_serializable() {
    let outcome = run_lockstep(IsolationLevel::Serializable, Scenario::WriteSkew).await;

    // B commits inside A's window, so A is the one rolled back.
    assert_eq!(outcome.task_b.outcome, TaskOutcome::Committed);
    assert!(matches!(
        outcome.task_a.outcome,
        TaskOutcome::RolledBackOnConflict { phase: Phase::Commit, ref code, .. } if code == "40001"
    ));
    assert!(outcome.final_value.unwrap() >= 1);
    assert_eq!(outcome.verdict, Verdict::ConflictDetected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn target_isolation_overrides_the_store_default() {
    let store = MemoryStore::new(IsolationLevel::ReadCommitted);
    let target = TargetContext::new("memory").with_isolation(Some(IsolationLevel::Serializable));
    let outcome = Orchestrator::new(store, target)
        .with_pacing(PacingMode::Lockstep)
        .run(Scenario::WriteSkew)
        .await
        .unwrap();

    assert_eq!(outcome.isolation, Some(IsolationLevel::Serializable));
    assert_eq!(outcome.verdict, Verdict::ConflictDetected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_higher_floor_makes_both_tasks_decline() {
    let store = MemoryStore::new(IsolationLevel::ReadCommitted);
    let outcome = Orchestrator::new(store, TargetContext::new("memory"))
        .with_pacing(PacingMode::Lockstep)
        .with_floor(2)
        .run(Scenario::WriteSkew)
        .await
        .unwrap();

    assert_eq!(outcome.final_value, Some(2));
    assert_eq!(outcome.verdict, Verdict::AnomalyPrevented);
}

// ============================================================================
// Dataset Reset
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_runs_start_from_the_same_seed() {
    let store = MemoryStore::new(IsolationLevel::ReadCommitted);
    let orchestrator =
        Orchestrator::new(store.clone(), TargetContext::new("memory")).with_pacing(PacingMode::Lockstep);

    let first = orchestrator.run(Scenario::WriteSkew).await.unwrap();
    let second = orchestrator.run(Scenario::WriteSkew).await.unwrap();

    assert_eq!(first.seed, second.seed);
    assert_eq!(first.task_a.observations, second.task_a.observations);
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(store.query_scalar(&Statement::SumAvailable).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scenarios_do_not_share_tables() {
    let store = MemoryStore::new(IsolationLevel::ReadCommitted);
    let orchestrator =
        Orchestrator::new(store.clone(), TargetContext::new("memory")).with_pacing(PacingMode::Lockstep);

    orchestrator.run(Scenario::PhantomRead).await.unwrap();
    let outcome = orchestrator.run(Scenario::WriteSkew).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::AnomalyObserved);
    assert_eq!(store.query_scalar(&Statement::SumUnbilled).await.unwrap(), 40);
}

// ============================================================================
// Failures
// ============================================================================

/// A memory store whose `n`th explicit transaction fails to open.
#[derive(Clone, Debug)]
struct FailingBegin {
    inner: MemoryStore,
    begins: Arc<AtomicUsize>,
    fail_on: usize,
}

impl FailingBegin {
    fn new(isolation: IsolationLevel, fail_on: usize) -> Self {
        Self {
            inner: MemoryStore::new(isolation),
            begins: Arc::new(AtomicUsize::new(0)),
            fail_on,
        }
    }
}

#[async_trait]
impl Store for FailingBegin {
    type Session = MemorySession;

    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn execute(&self, statement: &Statement) -> StoreResult<u64> {
        self.inner.execute(statement).await
    }

    async fn query_rows(&self, statement: &Statement) -> StoreResult<Vec<Row>> {
        self.inner.query_rows(statement).await
    }

    async fn begin(&self, isolation: Option<IsolationLevel>) -> StoreResult<MemorySession> {
        if self.begins.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(StoreError::Connect("connection reset by peer".to_string()));
        }
        self.inner.begin(isolation).await
    }

    async fn close(&self) {}
}

#[test_case(1, "task A"; "leader fails")]
#[test_case(2, "task B"; "follower fails")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_task_is_inconclusive_without_deadlock(fail_on: usize, culprit: &str) {
    let store = FailingBegin::new(IsolationLevel::ReadCommitted, fail_on);
    let orchestrator = Orchestrator::new(store, TargetContext::new("failing"))
        .with_pacing(PacingMode::Lockstep);
    let run = orchestrator.run(Scenario::PhantomRead);

    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("tasks deadlocked")
        .unwrap();

    let Verdict::Inconclusive(reason) = &outcome.verdict else {
        panic!("expected an inconclusive verdict, got {:?}", outcome.verdict);
    };
    assert!(reason.contains(culprit), "{reason}");
    assert!(reason.contains("begin"), "{reason}");
}

/// How a [`BrokenPrep`] store spoils the dataset reset.
#[derive(Clone, Copy, Debug)]
enum Breakage {
    /// `CREATE TABLE` is refused.
    DenyCreate,
    /// The read-back loses its last row.
    DropLastRow,
}

/// A memory store whose dataset reset goes wrong.
#[derive(Clone, Debug)]
struct BrokenPrep {
    inner: MemoryStore,
    breakage: Breakage,
}

impl BrokenPrep {
    fn new(breakage: Breakage) -> Self {
        Self {
            inner: MemoryStore::new(IsolationLevel::ReadCommitted),
            breakage,
        }
    }
}

#[async_trait]
impl Store for BrokenPrep {
    type Session = MemorySession;

    fn kind(&self) -> &'static str {
        "broken"
    }

    async fn execute(&self, statement: &Statement) -> StoreResult<u64> {
        if let (Breakage::DenyCreate, Statement::CreateTable(_)) = (self.breakage, statement) {
            return Err(StoreError::from_sqlstate(
                Some("42501".to_string()),
                "permission denied for schema public",
            ));
        }
        self.inner.execute(statement).await
    }

    async fn query_rows(&self, statement: &Statement) -> StoreResult<Vec<Row>> {
        let mut rows = self.inner.query_rows(statement).await?;
        if let (Breakage::DropLastRow, Statement::SelectRows(_)) = (self.breakage, statement) {
            rows.pop();
        }
        Ok(rows)
    }

    async fn begin(&self, isolation: Option<IsolationLevel>) -> StoreResult<MemorySession> {
        self.inner.begin(isolation).await
    }

    async fn close(&self) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_ddl_fails_the_run_and_names_the_target() {
    let store = BrokenPrep::new(Breakage::DenyCreate);
    let err = Orchestrator::new(store, TargetContext::new("CockroachDB"))
        .with_pacing(PacingMode::Lockstep)
        .run(Scenario::PhantomRead)
        .await
        .unwrap_err();

    assert!(err.is_schema_prep());
    assert!(matches!(
        err,
        RunError::SchemaPrep {
            ref target,
            dataset: Dataset::Accounts,
            step: PrepStep::Create,
            ref source,
        } if target == "CockroachDB" && source.code() == Some("42501")
    ));
    assert!(err.to_string().contains("'CockroachDB'"), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_back_that_differs_from_the_seed_is_a_mismatch() {
    let store = BrokenPrep::new(Breakage::DropLastRow);
    let err = Orchestrator::new(store, TargetContext::new("PostgreSQL"))
        .with_pacing(PacingMode::Lockstep)
        .run(Scenario::WriteSkew)
        .await
        .unwrap_err();

    assert!(err.is_schema_prep());
    let RunError::SeedMismatch {
        target,
        dataset,
        expected,
        actual,
    } = err
    else {
        panic!("expected a seed mismatch, got {err:?}");
    };
    assert_eq!(target, "PostgreSQL");
    assert_eq!(dataset, Dataset::Availability);
    assert_eq!(expected.len(), 4);
    assert_eq!(actual, expected[..3].to_vec());
}

// ============================================================================
// Wall Clock
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wall_clock_pacing_reproduces_the_phantom() {
    let timing = ScenarioTiming::new(TaskTiming::new(0, 400), TaskTiming::new(100, 0));
    let store = MemoryStore::new(IsolationLevel::ReadCommitted);
    let outcome = Orchestrator::new(store, TargetContext::new("memory"))
        .with_pacing(PacingMode::WallClock)
        .with_timing(Scenario::PhantomRead, timing)
        .run(Scenario::PhantomRead)
        .await
        .unwrap();

    assert_eq!(outcome.task_a.listing_totals(), vec![100, 40]);
    assert_eq!(outcome.verdict, Verdict::AnomalyObserved);
    assert!(outcome.elapsed >= Duration::from_millis(400));
}
