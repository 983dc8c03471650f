//! Dataset Preparer.
//!
//! Every scenario run starts from an identical, literal seed: the table is
//! dropped, recreated, seeded and read back before either task starts.

use std::fmt;

use crate::error::RunError;
use crate::store::{Row, Statement, Store, Value};

/// A scenario's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dataset {
    /// `accounts (id, price, isBilled)`, used by the phantom read scenario.
    Accounts,
    /// `availability (id, name, isAvailable)`, used by the write skew scenario.
    Availability,
}

impl Dataset {
    pub fn table(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Availability => "availability",
        }
    }

    /// Column names in the order rows are read back.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Accounts => &["id", "price", "isBilled"],
            Self::Availability => &["id", "name", "isAvailable"],
        }
    }

    /// The literal seed, in id order, as it reads back after preparation.
    pub fn seed_rows(self) -> Vec<Row> {
        match self {
            Self::Accounts => [(1, 10), (2, 20), (3, 10), (4, 20), (5, 10), (6, 20), (7, 10)]
                .into_iter()
                .map(|(id, price)| {
                    Row::new(vec![Value::Int(id), Value::Int(price), Value::Bool(false)])
                })
                .collect(),
            Self::Availability => [(1, 1), (2, 0), (3, 0), (4, 1)]
                .into_iter()
                .map(|(id, available)| {
                    Row::new(vec![
                        Value::Int(id),
                        Value::Text(format!("Doctor {id}")),
                        Value::Int(available),
                    ])
                })
                .collect(),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// The statement of a preparation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepStep {
    Drop,
    Create,
    Seed,
    Verify,
}

impl fmt::Display for PrepStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Drop => "drop",
            Self::Create => "create",
            Self::Seed => "seed",
            Self::Verify => "verify",
        })
    }
}

/// The table as read back immediately after seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSnapshot {
    pub dataset: Dataset,
    pub rows: Vec<Row>,
}

impl SeedSnapshot {
    pub fn columns(&self) -> &'static [&'static str] {
        self.dataset.columns()
    }
}

/// Resets `dataset` to its literal seed and verifies the result.
///
/// Must complete before any task starts; nothing else touches the table
/// while it runs. `target` only labels errors.
pub async fn prepare<S: Store>(
    store: &S,
    target: &str,
    dataset: Dataset,
) -> Result<SeedSnapshot, RunError> {
    let steps = [
        (PrepStep::Drop, Statement::DropTable(dataset)),
        (PrepStep::Create, Statement::CreateTable(dataset)),
        (PrepStep::Seed, Statement::SeedRows(dataset)),
    ];

    for (step, statement) in steps {
        store
            .execute(&statement)
            .await
            .map_err(|source| RunError::SchemaPrep {
                target: target.to_string(),
                dataset,
                step,
                source,
            })?;
        tracing::debug!(%dataset, %step, "dataset step complete");
    }

    let rows = read_back(store, target, dataset).await?;
    let expected = dataset.seed_rows();
    if rows != expected {
        return Err(RunError::SeedMismatch {
            target: target.to_string(),
            dataset,
            expected,
            actual: rows,
        });
    }

    tracing::info!(%dataset, rows = rows.len(), backend = store.kind(), "dataset prepared");
    Ok(SeedSnapshot { dataset, rows })
}

/// Reads every row of the dataset's table, in id order.
pub async fn read_back<S: Store>(
    store: &S,
    target: &str,
    dataset: Dataset,
) -> Result<Vec<Row>, RunError> {
    store
        .query_rows(&Statement::SelectRows(dataset))
        .await
        .map_err(|source| RunError::SchemaPrep {
            target: target.to_string(),
            dataset,
            step: PrepStep::Verify,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IsolationLevel, MemoryStore, Session};

    #[test]
    fn seeds_have_the_documented_totals() {
        let unbilled: i64 = Dataset::Accounts
            .seed_rows()
            .iter()
            .map(|row| row.int(1).unwrap())
            .sum();
        assert_eq!(unbilled, 100);

        let available: i64 = Dataset::Availability
            .seed_rows()
            .iter()
            .map(|row| row.int(2).unwrap())
            .sum();
        assert_eq!(available, 2);
    }

    #[test]
    fn columns_match_seed_width() {
        for dataset in [Dataset::Accounts, Dataset::Availability] {
            for row in dataset.seed_rows() {
                assert_eq!(row.values().len(), dataset.columns().len());
            }
        }
    }

    #[tokio::test]
    async fn prepare_resets_a_modified_table() {
        let store = MemoryStore::new(IsolationLevel::ReadCommitted);
        prepare(&store, "Memory", Dataset::Availability).await.unwrap();

        let mut session = store.begin(None).await.unwrap();
        session.execute(&Statement::MarkUnavailable(1)).await.unwrap();
        session.execute(&Statement::MarkUnavailable(4)).await.unwrap();
        session.commit().await.unwrap();

        let snapshot = prepare(&store, "Memory", Dataset::Availability).await.unwrap();
        assert_eq!(snapshot.rows, Dataset::Availability.seed_rows());
        assert_eq!(snapshot.columns(), &["id", "name", "isAvailable"]);
    }

    #[tokio::test]
    async fn prepare_is_idempotent() {
        let store = MemoryStore::new(IsolationLevel::Serializable);
        let first = prepare(&store, "Memory", Dataset::Accounts).await.unwrap();
        let second = prepare(&store, "Memory", Dataset::Accounts).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn read_back_of_a_missing_table_is_a_prep_error() {
        let store = MemoryStore::new(IsolationLevel::ReadCommitted);
        let err = read_back(&store, "Memory", Dataset::Accounts).await.unwrap_err();
        assert!(err.is_schema_prep());
        assert!(matches!(
            err,
            RunError::SchemaPrep {
                step: PrepStep::Verify,
                ..
            }
        ));
    }
}
