//! Interleaving control for the two tasks of a scenario.
//!
//! Two pacing modes force task B's work to land inside task A's
//! interleaving window:
//!
//! - [`PacingMode::WallClock`]: each task sleeps for its configured start
//!   delay and window. Timing-dependent, but observable by a human.
//! - [`PacingMode::Lockstep`]: the tasks rendezvous on two barriers. A opens
//!   the window after its first step, B runs start to finish inside it,
//!   and A continues once B has finished. Deterministic; used by tests.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Barrier;

// ============================================================================
// Timing
// ============================================================================

/// Delays for one task, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskTiming {
    /// Delay before the task begins its transaction.
    pub start_delay_ms: u64,
    /// Pause between the task's first and second step.
    pub window_ms: u64,
}

impl TaskTiming {
    pub const fn new(start_delay_ms: u64, window_ms: u64) -> Self {
        Self {
            start_delay_ms,
            window_ms,
        }
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Delays for both tasks of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScenarioTiming {
    pub task_a: TaskTiming,
    pub task_b: TaskTiming,
}

impl ScenarioTiming {
    pub const fn new(task_a: TaskTiming, task_b: TaskTiming) -> Self {
        Self { task_a, task_b }
    }
}

// ============================================================================
// Pacers
// ============================================================================

/// How the two tasks of a run are interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PacingMode {
    #[default]
    WallClock,
    Lockstep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Task A: holds the window open.
    Leader,
    /// Task B: runs inside the window.
    Follower,
}

#[derive(Debug)]
struct Gates {
    opened: Barrier,
    closed: Barrier,
}

#[derive(Debug)]
enum Mode {
    WallClock(TaskTiming),
    Lockstep(Arc<Gates>),
}

/// One task's side of the interleaving.
///
/// Each lockstep gate is passed exactly once by each task. [`Pacer::finish`]
/// passes any gate not yet passed, so a task that fails early still
/// releases its sibling.
#[derive(Debug)]
pub struct Pacer {
    role: Role,
    mode: Mode,
    passed_opened: bool,
    passed_closed: bool,
}

/// Builds the pacers for task A and task B.
pub fn pair(mode: PacingMode, timing: ScenarioTiming) -> (Pacer, Pacer) {
    let (a, b) = match mode {
        PacingMode::WallClock => (
            Mode::WallClock(timing.task_a),
            Mode::WallClock(timing.task_b),
        ),
        PacingMode::Lockstep => {
            let gates = Arc::new(Gates {
                opened: Barrier::new(2),
                closed: Barrier::new(2),
            });
            (Mode::Lockstep(Arc::clone(&gates)), Mode::Lockstep(gates))
        }
    };
    (Pacer::new(Role::Leader, a), Pacer::new(Role::Follower, b))
}

impl Pacer {
    fn new(role: Role, mode: Mode) -> Self {
        Self {
            role,
            mode,
            passed_opened: false,
            passed_closed: false,
        }
    }

    /// Called before the task begins its transaction.
    pub async fn before_begin(&mut self) {
        match self.mode {
            Mode::WallClock(timing) => sleep(timing.start_delay()).await,
            Mode::Lockstep(_) => {
                if self.role == Role::Follower {
                    self.pass_opened().await;
                }
            }
        }
    }

    /// Called between the task's first and second step.
    pub async fn interleave(&mut self) {
        match self.mode {
            Mode::WallClock(timing) => sleep(timing.window()).await,
            Mode::Lockstep(_) => {
                if self.role == Role::Leader {
                    self.pass_opened().await;
                    self.pass_closed().await;
                }
            }
        }
    }

    /// Called once the task is done, whatever its outcome.
    pub async fn finish(&mut self) {
        if matches!(self.mode, Mode::Lockstep(_)) {
            self.pass_opened().await;
            self.pass_closed().await;
        }
    }

    async fn pass_opened(&mut self) {
        if let (Mode::Lockstep(gates), false) = (&self.mode, self.passed_opened) {
            gates.opened.wait().await;
            self.passed_opened = true;
            tracing::trace!(role = ?self.role, "passed opened gate");
        }
    }

    async fn pass_closed(&mut self) {
        if let (Mode::Lockstep(gates), false) = (&self.mode, self.passed_closed) {
            gates.closed.wait().await;
            self.passed_closed = true;
            tracing::trace!(role = ?self.role, "passed closed gate");
        }
    }
}

async fn sleep(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn timing_accessors_convert_milliseconds() {
        let timing = TaskTiming::new(500, 2000);
        assert_eq!(timing.start_delay(), Duration::from_millis(500));
        assert_eq!(timing.window(), Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lockstep_runs_follower_inside_leader_window() {
        let (mut a, mut b) = pair(PacingMode::Lockstep, ScenarioTiming::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                a.before_begin().await;
                log.lock().unwrap().push("a1");
                a.interleave().await;
                log.lock().unwrap().push("a2");
                a.finish().await;
            })
        };
        let follower = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                b.before_begin().await;
                log.lock().unwrap().push("b1");
                b.interleave().await;
                log.lock().unwrap().push("b2");
                b.finish().await;
            })
        };

        let (leader, follower) = tokio::join!(leader, follower);
        leader.unwrap();
        follower.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a1", "b1", "b2", "a2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn early_finish_releases_the_sibling() {
        for failing_leader in [true, false] {
            let (mut a, mut b) = pair(PacingMode::Lockstep, ScenarioTiming::default());

            let leader = tokio::spawn(async move {
                if !failing_leader {
                    a.before_begin().await;
                    a.interleave().await;
                }
                a.finish().await;
            });
            let follower = tokio::spawn(async move {
                if failing_leader {
                    b.before_begin().await;
                    b.interleave().await;
                }
                b.finish().await;
            });

            let joined = tokio::time::timeout(Duration::from_secs(5), async {
                let (leader, follower) = tokio::join!(leader, follower);
                leader.unwrap();
                follower.unwrap();
            })
            .await;
            assert!(joined.is_ok(), "pacers deadlocked");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_sleeps_the_configured_delays() {
        let timing = ScenarioTiming::new(TaskTiming::new(0, 2000), TaskTiming::new(500, 0));
        let (mut a, mut b) = pair(PacingMode::WallClock, timing);

        let start = tokio::time::Instant::now();
        a.before_begin().await;
        a.interleave().await;
        a.finish().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(2100));

        let start = tokio::time::Instant::now();
        b.before_begin().await;
        b.interleave().await;
        b.finish().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(600));
    }
}
