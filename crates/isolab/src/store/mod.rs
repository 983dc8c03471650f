//! Store gateway: the boundary between the harness and a transactional store.
//!
//! A [`Store`] runs statements in autocommit mode and opens [`Session`]s, each
//! of which is one store-level transaction on its own connection. Two
//! backends are provided:
//!
//! - [`PgStore`]: PostgreSQL wire protocol via sqlx (PostgreSQL, CockroachDB)
//! - [`MemoryStore`]: an in-process multi-version store for offline runs and tests
//!
//! [`Backend`] selects one of them from a connection URL.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

pub mod memory;
pub mod postgres;
mod statement;

pub use memory::{MemorySession, MemoryStore};
pub use postgres::{PgSession, PgStore};
pub use statement::Statement;

// ============================================================================
// Values and Rows
// ============================================================================

/// A single column value, independent of the driver that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Bool(bool),
    Text(String),
}

impl Value {
    /// Returns the integer, if this is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// An ordered list of column values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Reads column `index` as an integer.
    pub fn int(&self, index: usize) -> StoreResult<i64> {
        self.get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| self.decode_error(index, "an integer"))
    }

    /// Reads column `index` as a boolean.
    pub fn bool(&self, index: usize) -> StoreResult<bool> {
        self.get(index)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.decode_error(index, "a boolean"))
    }

    /// Returns a copy with column `index` set to `value`.
    pub fn replaced(&self, index: usize, value: Value) -> StoreResult<Row> {
        let mut values = self.0.clone();
        let slot = values
            .get_mut(index)
            .ok_or_else(|| self.decode_error(index, "a column to update"))?;
        *slot = value;
        Ok(Self(values))
    }

    fn decode_error(&self, index: usize, expected: &str) -> StoreError {
        StoreError::Decode {
            column: index.to_string(),
            message: format!("expected {expected}, found {:?}", self.get(index)),
        }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

// ============================================================================
// Isolation Level
// ============================================================================

/// Transaction isolation level requested at `begin`.
///
/// When no level is requested the store's default applies (read committed
/// on PostgreSQL, serializable on CockroachDB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    ReadCommitted,
    /// Snapshot isolation on PostgreSQL.
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn all() -> &'static [IsolationLevel] {
        &[Self::ReadCommitted, Self::RepeatableRead, Self::Serializable]
    }

    /// The statement that applies this level to the current transaction.
    pub fn set_transaction_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown isolation level name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown isolation level '{0}' (expected read-committed, repeatable-read, snapshot or serializable)")]
pub struct ParseIsolationError(String);

impl FromStr for IsolationLevel {
    type Err = ParseIsolationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "read-committed" => Ok(Self::ReadCommitted),
            "repeatable-read" | "snapshot" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            _ => Err(ParseIsolationError(s.to_string())),
        }
    }
}

// ============================================================================
// Gateway Traits
// ============================================================================

/// A transactional store.
///
/// Handles are cheap to clone; every clone shares the same underlying pool
/// so concurrent tasks each get an independent connection.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// Transaction handle produced by [`Store::begin`].
    type Session: Session;

    /// Short backend name for logs.
    fn kind(&self) -> &'static str;

    /// Executes a statement outside any explicit transaction.
    async fn execute(&self, statement: &Statement) -> StoreResult<u64>;

    /// Runs a query outside any explicit transaction.
    async fn query_rows(&self, statement: &Statement) -> StoreResult<Vec<Row>>;

    /// Runs a single-value query outside any explicit transaction.
    async fn query_scalar(&self, statement: &Statement) -> StoreResult<i64> {
        let rows = self.query_rows(statement).await?;
        scalar(statement, &rows)
    }

    /// Opens a transaction, optionally overriding the isolation level.
    async fn begin(&self, isolation: Option<IsolationLevel>) -> StoreResult<Self::Session>;

    /// Releases every connection held by this store.
    async fn close(&self);
}

/// One open transaction.
#[async_trait]
pub trait Session: Send + Sized + 'static {
    async fn execute(&mut self, statement: &Statement) -> StoreResult<u64>;

    async fn query_rows(&mut self, statement: &Statement) -> StoreResult<Vec<Row>>;

    async fn query_scalar(&mut self, statement: &Statement) -> StoreResult<i64> {
        let rows = self.query_rows(statement).await?;
        scalar(statement, &rows)
    }

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

/// Extracts the single integer of a one-row, one-column result.
fn scalar(statement: &Statement, rows: &[Row]) -> StoreResult<i64> {
    match rows {
        [row] => match row.get(0) {
            Some(Value::Null) => Ok(0),
            _ => row.int(0),
        },
        _ => Err(StoreError::Decode {
            column: "0".to_string(),
            message: format!(
                "expected exactly one row from '{}', got {}",
                statement.sql(),
                rows.len()
            ),
        }),
    }
}

// ============================================================================
// Backend Selection
// ============================================================================

/// Connection settings shared by every backend.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Upper bound on pooled connections (raised to at least 3).
    pub max_connections: u32,
    /// How long to wait for a connection before giving up.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A store selected at runtime from a connection URL.
#[derive(Debug, Clone)]
pub enum Backend {
    Postgres(PgStore),
    Memory(MemoryStore),
}

impl Backend {
    /// Opens the backend named by the URL scheme.
    ///
    /// - `postgres://...` / `postgresql://...`: [`PgStore`]
    /// - `memory://<isolation>`: [`MemoryStore`] whose default isolation is
    ///   `<isolation>` (read committed when omitted)
    pub async fn open(url: &str, options: &ConnectOptions) -> StoreResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Self::Postgres(PgStore::connect(url, options).await?));
        }
        if let Some(rest) = url.strip_prefix("memory://") {
            let isolation = if rest.is_empty() {
                IsolationLevel::ReadCommitted
            } else {
                rest.parse()
                    .map_err(|_| StoreError::UnsupportedUrl(url.to_string()))?
            };
            return Ok(Self::Memory(MemoryStore::new(isolation)));
        }
        Err(StoreError::UnsupportedUrl(url.to_string()))
    }
}

/// Transaction handle of a [`Backend`].
#[derive(Debug)]
pub enum BackendSession {
    Postgres(PgSession),
    Memory(MemorySession),
}

#[async_trait]
impl Store for Backend {
    type Session = BackendSession;

    fn kind(&self) -> &'static str {
        match self {
            Self::Postgres(store) => store.kind(),
            Self::Memory(store) => store.kind(),
        }
    }

    async fn execute(&self, statement: &Statement) -> StoreResult<u64> {
        match self {
            Self::Postgres(store) => store.execute(statement).await,
            Self::Memory(store) => store.execute(statement).await,
        }
    }

    async fn query_rows(&self, statement: &Statement) -> StoreResult<Vec<Row>> {
        match self {
            Self::Postgres(store) => store.query_rows(statement).await,
            Self::Memory(store) => store.query_rows(statement).await,
        }
    }

    async fn begin(&self, isolation: Option<IsolationLevel>) -> StoreResult<BackendSession> {
        match self {
            Self::Postgres(store) => store.begin(isolation).await.map(BackendSession::Postgres),
            Self::Memory(store) => store.begin(isolation).await.map(BackendSession::Memory),
        }
    }

    async fn close(&self) {
        match self {
            Self::Postgres(store) => store.close().await,
            Self::Memory(store) => store.close().await,
        }
    }
}

#[async_trait]
impl Session for BackendSession {
    async fn execute(&mut self, statement: &Statement) -> StoreResult<u64> {
        match self {
            Self::Postgres(session) => session.execute(statement).await,
            Self::Memory(session) => session.execute(statement).await,
        }
    }

    async fn query_rows(&mut self, statement: &Statement) -> StoreResult<Vec<Row>> {
        match self {
            Self::Postgres(session) => session.query_rows(statement).await,
            Self::Memory(session) => session.query_rows(statement).await,
        }
    }

    async fn commit(self) -> StoreResult<()> {
        match self {
            Self::Postgres(session) => session.commit().await,
            Self::Memory(session) => session.commit().await,
        }
    }

    async fn rollback(self) -> StoreResult<()> {
        match self {
            Self::Postgres(session) => session.rollback().await,
            Self::Memory(session) => session.rollback().await,
        }
    }
}
