//! # isolab
//!
//! Reproduces two transaction-isolation anomalies, phantom reads and write
//! skew, against a transactional SQL store, and reports whether the store's
//! isolation level let them happen.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────────────┐
//! │   Scenario   │──▶│ Orchestrator │──▶│ Dataset Preparer (reset)   │
//! └──────────────┘   └──────┬───────┘   └────────────────────────────┘
//!                           │ spawn A, then B
//!                ┌──────────┴──────────┐
//!                ▼                     ▼
//!          ┌──────────┐  Pacer   ┌──────────┐
//!          │  Task A  │◀────────▶│  Task B  │
//!          └────┬─────┘          └────┬─────┘
//!               │   own transaction   │
//!               ▼                     ▼
//!          ┌──────────────────────────────┐
//!          │  Store (PostgreSQL / memory) │
//!          └──────────────────────────────┘
//! ```
//!
//! Each task runs in its own store transaction on its own connection. The
//! only coordination between them is the [`pacing`] that places task B's
//! work inside task A's interleaving window; everything else is left to the
//! store.
//!
//! # Example
//!
//! ```ignore
//! use isolab::{
//!     IsolationLevel, MemoryStore, Orchestrator, PacingMode, Scenario, TargetContext, Verdict,
//! };
//!
//! let store = MemoryStore::new(IsolationLevel::ReadCommitted);
//! let outcome = Orchestrator::new(store, TargetContext::new("memory"))
//!     .with_pacing(PacingMode::Lockstep)
//!     .run(Scenario::WriteSkew)
//!     .await?;
//! assert_eq!(outcome.verdict, Verdict::AnomalyObserved);
//! ```

pub mod dataset;
pub mod error;
pub mod orchestrator;
pub mod pacing;
pub mod scenario;
pub mod store;
pub mod task;

pub use dataset::{Dataset, PrepStep, SeedSnapshot};
pub use error::{RunError, StoreError, StoreResult};
pub use orchestrator::{Orchestrator, ScenarioOutcome, TargetContext};
pub use pacing::{PacingMode, ScenarioTiming, TaskTiming};
pub use scenario::{DEFAULT_FLOOR, Scenario, Verdict};
pub use store::{
    Backend, ConnectOptions, IsolationLevel, MemoryStore, PgStore, Row, Session, Statement, Store,
    Value,
};
pub use task::{Observation, Phase, TaskLabel, TaskOutcome, TaskReport};
