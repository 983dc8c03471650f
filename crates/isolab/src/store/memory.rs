//! In-process multi-version store.
//!
//! Models the three isolation levels closely enough to reproduce (or
//! prevent) the two anomalies without an external database:
//!
//! - **Read committed**: every statement reads the latest committed version.
//! - **Repeatable read**: the snapshot is taken at the first statement;
//!   first committer wins when two transactions write the same row.
//! - **Serializable**: repeatable read, plus a writing transaction fails to
//!   commit if another transaction committed a write, after its snapshot,
//!   to a table it read.
//!
//! Rows written concurrently under read committed are last-writer-wins.
//! Conflicts surface as SQLSTATE `40001`, missing tables as `42P01`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{IsolationLevel, Row, Session, Statement, Store, Value};
use crate::dataset::Dataset;
use crate::error::{StoreError, StoreResult};

const SERIALIZATION_FAILURE: &str = "40001";
const UNDEFINED_TABLE: &str = "42P01";
const DUPLICATE_TABLE: &str = "42P07";
const FEATURE_NOT_SUPPORTED: &str = "0A000";

/// Rows of one table keyed by id. Column 0 of every row is the id.
type Rows = BTreeMap<i64, Row>;

/// A committed version of a table.
#[derive(Debug, Clone)]
struct Version {
    committed_at: u64,
    rows: Rows,
    /// Ids written by the commit that produced this version.
    written: BTreeSet<i64>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Logical commit clock.
    clock: u64,
    tables: BTreeMap<Dataset, Vec<Version>>,
}

impl Inner {
    fn versions(&self, dataset: Dataset) -> StoreResult<&Vec<Version>> {
        self.tables.get(&dataset).ok_or_else(|| undefined_table(dataset))
    }

    /// Rows visible at `snapshot`, or the latest when `snapshot` is `None`.
    fn visible(&self, dataset: Dataset, snapshot: Option<u64>) -> StoreResult<Rows> {
        let versions = self.versions(dataset)?;
        let version = match snapshot {
            Some(ts) => versions.iter().rev().find(|v| v.committed_at <= ts),
            None => versions.last(),
        };
        Ok(version.map(|v| v.rows.clone()).unwrap_or_default())
    }

    /// Returns true if a commit after `snapshot` wrote to `dataset`,
    /// restricted to `ids` when given.
    fn written_since(&self, dataset: Dataset, snapshot: u64, ids: Option<&BTreeSet<i64>>) -> bool {
        self.tables.get(&dataset).is_some_and(|versions| {
            versions
                .iter()
                .filter(|v| v.committed_at > snapshot)
                .any(|v| match ids {
                    Some(ids) => !v.written.is_disjoint(ids),
                    None => !v.written.is_empty(),
                })
        })
    }

    fn install(&mut self, dataset: Dataset, updates: &Rows) -> StoreResult<()> {
        let mut rows = self.visible(dataset, None)?;
        rows.extend(updates.iter().map(|(id, row)| (*id, row.clone())));
        self.clock += 1;
        let committed_at = self.clock;
        if let Some(versions) = self.tables.get_mut(&dataset) {
            versions.push(Version {
                committed_at,
                rows,
                written: updates.keys().copied().collect(),
            });
        }
        Ok(())
    }
}

/// An in-process store with a fixed default isolation level.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    default_isolation: IsolationLevel,
}

impl MemoryStore {
    pub fn new(default_isolation: IsolationLevel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            default_isolation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_ddl(&self, statement: &Statement) -> StoreResult<u64> {
        let mut inner = self.lock();
        let dataset = statement.dataset();
        match statement {
            Statement::DropTable(_) => {
                inner.tables.remove(&dataset);
            }
            _ => {
                if inner.tables.contains_key(&dataset) {
                    return Err(StoreError::from_sqlstate(
                        Some(DUPLICATE_TABLE.to_string()),
                        format!("relation \"{}\" already exists", dataset.table()),
                    ));
                }
                let committed_at = inner.clock;
                inner.tables.insert(
                    dataset,
                    vec![Version {
                        committed_at,
                        rows: Rows::new(),
                        written: BTreeSet::new(),
                    }],
                );
            }
        }
        Ok(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Session = MemorySession;

    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, statement: &Statement) -> StoreResult<u64> {
        if statement.is_ddl() {
            return self.run_ddl(statement);
        }
        let mut session = self.begin(Some(IsolationLevel::ReadCommitted)).await?;
        let affected = session.execute(statement).await?;
        session.commit().await?;
        Ok(affected)
    }

    async fn query_rows(&self, statement: &Statement) -> StoreResult<Vec<Row>> {
        let mut session = self.begin(Some(IsolationLevel::ReadCommitted)).await?;
        let rows = session.query_rows(statement).await?;
        session.commit().await?;
        Ok(rows)
    }

    async fn begin(&self, isolation: Option<IsolationLevel>) -> StoreResult<MemorySession> {
        Ok(MemorySession {
            store: self.clone(),
            isolation: isolation.unwrap_or(self.default_isolation),
            snapshot: None,
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
        })
    }

    async fn close(&self) {}
}

/// One transaction against a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    isolation: IsolationLevel,
    snapshot: Option<u64>,
    /// Tables read by this transaction.
    reads: BTreeSet<Dataset>,
    /// Buffered row images, installed at commit.
    writes: BTreeMap<Dataset, Rows>,
}

impl MemorySession {
    /// The rows this transaction sees: its read view plus its own writes.
    fn view(&mut self, inner: &Inner, dataset: Dataset) -> StoreResult<Rows> {
        let snapshot = match self.isolation {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                Some(*self.snapshot.get_or_insert(inner.clock))
            }
        };
        let mut rows = inner.visible(dataset, snapshot)?;
        if let Some(own) = self.writes.get(&dataset) {
            rows.extend(own.iter().map(|(id, row)| (*id, row.clone())));
        }
        Ok(rows)
    }

    fn apply(&mut self, statement: &Statement) -> StoreResult<(Vec<Row>, u64)> {
        if statement.is_ddl() {
            return Err(StoreError::from_sqlstate(
                Some(FEATURE_NOT_SUPPORTED.to_string()),
                "schema changes are not supported inside a transaction",
            ));
        }

        let dataset = statement.dataset();
        let store = self.store.clone();
        let inner = store.lock();
        let rows = self.view(&inner, dataset)?;
        drop(inner);

        let (result, updates) = evaluate(statement, &rows)?;
        self.reads.insert(dataset);
        let affected = updates.len() as u64;
        self.writes.entry(dataset).or_default().extend(updates);
        Ok((result, affected))
    }

    fn conflict(message: &str) -> StoreError {
        StoreError::from_sqlstate(Some(SERIALIZATION_FAILURE.to_string()), message)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&mut self, statement: &Statement) -> StoreResult<u64> {
        self.apply(statement).map(|(_, affected)| affected)
    }

    async fn query_rows(&mut self, statement: &Statement) -> StoreResult<Vec<Row>> {
        self.apply(statement).map(|(rows, _)| rows)
    }

    async fn commit(mut self) -> StoreResult<()> {
        self.writes.retain(|_, rows| !rows.is_empty());
        if self.writes.is_empty() {
            return Ok(());
        }

        let mut inner = self.store.lock();

        if let (Some(snapshot), IsolationLevel::RepeatableRead | IsolationLevel::Serializable) =
            (self.snapshot, self.isolation)
        {
            for (dataset, rows) in &self.writes {
                let ids: BTreeSet<i64> = rows.keys().copied().collect();
                if inner.written_since(*dataset, snapshot, Some(&ids)) {
                    return Err(Self::conflict(
                        "could not serialize access due to concurrent update",
                    ));
                }
            }

            if self.isolation == IsolationLevel::Serializable {
                for dataset in &self.reads {
                    if inner.written_since(*dataset, snapshot, None) {
                        return Err(Self::conflict(
                            "could not serialize access due to read/write dependencies among transactions",
                        ));
                    }
                }
            }
        }

        for (dataset, rows) in &self.writes {
            inner.install(*dataset, rows)?;
        }
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

fn undefined_table(dataset: Dataset) -> StoreError {
    StoreError::from_sqlstate(
        Some(UNDEFINED_TABLE.to_string()),
        format!("relation \"{}\" does not exist", dataset.table()),
    )
}

/// Runs one statement against a table image.
///
/// Returns the result rows and the row images the statement wrote.
fn evaluate(statement: &Statement, rows: &Rows) -> StoreResult<(Vec<Row>, Rows)> {
    let mut result = Vec::new();
    let mut updates = Rows::new();

    match *statement {
        Statement::SeedRows(dataset) => {
            for row in dataset.seed_rows() {
                let id = row.int(0)?;
                updates.insert(id, row);
            }
        }
        Statement::SelectRows(_) => {
            result.extend(rows.values().cloned());
        }
        Statement::ListUnbilled => {
            for row in rows.values() {
                if !row.bool(2)? {
                    result.push(Row::new(vec![Value::Int(row.int(0)?), Value::Int(row.int(1)?)]));
                }
            }
        }
        Statement::SumUnbilled => {
            let mut total = 0;
            for row in rows.values() {
                if !row.bool(2)? {
                    total += row.int(1)?;
                }
            }
            result.push(Row::new(vec![Value::Int(total)]));
        }
        Statement::BillAtPrice(price) => {
            for (id, row) in rows {
                if row.int(1)? == price {
                    updates.insert(*id, row.replaced(2, Value::Bool(true))?);
                }
            }
        }
        Statement::SumAvailable => {
            let mut total = 0;
            for row in rows.values() {
                total += row.int(2)?;
            }
            result.push(Row::new(vec![Value::Int(total)]));
        }
        Statement::MarkUnavailable(id) => {
            if let Some(row) = rows.get(&id) {
                updates.insert(id, row.replaced(2, Value::Int(0))?);
            }
        }
        Statement::DropTable(_) | Statement::CreateTable(_) => {
            return Err(StoreError::from_sqlstate(
                Some(FEATURE_NOT_SUPPORTED.to_string()),
                "schema statements return no rows",
            ));
        }
    }

    Ok((result, updates))
}
