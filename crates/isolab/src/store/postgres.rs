//! PostgreSQL-wire backend (PostgreSQL, CockroachDB) built on sqlx.
//!
//! Each [`PgSession`] holds its own pooled connection for the lifetime of its
//! transaction, so two concurrent tasks never share a connection.

use std::fmt;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, Transaction, TypeInfo};

use super::{ConnectOptions, IsolationLevel, Row, Session, Statement, Store, Value};
use crate::error::{StoreError, StoreResult};

/// Connections needed by one run: task A, task B and the orchestrator's reads.
const MIN_CONNECTIONS: u32 = 3;

/// A pooled PostgreSQL-wire store.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects eagerly so an unreachable target fails here, not mid-scenario.
    pub async fn connect(url: &str, options: &ConnectOptions) -> StoreResult<Self> {
        let max_connections = options.max_connections.max(MIN_CONNECTIONS);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect(url)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        tracing::debug!(max_connections, "PostgreSQL pool created");

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    type Session = PgSession;

    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, statement: &Statement) -> StoreResult<u64> {
        let result = bind(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query_rows(&self, statement: &Statement) -> StoreResult<Vec<Row>> {
        let rows = bind(statement).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn begin(&self, isolation: Option<IsolationLevel>) -> StoreResult<PgSession> {
        let mut tx = self.pool.begin().await?;
        if let Some(level) = isolation {
            sqlx::query(level.set_transaction_sql())
                .execute(&mut *tx)
                .await?;
        }
        Ok(PgSession { tx })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// One PostgreSQL transaction.
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

impl fmt::Debug for PgSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSession").finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, statement: &Statement) -> StoreResult<u64> {
        let result = bind(statement).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn query_rows(&mut self, statement: &Statement) -> StoreResult<Vec<Row>> {
        let rows = bind(statement).fetch_all(&mut *self.tx).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Builds the sqlx query for a statement with its parameters bound.
fn bind(statement: &Statement) -> Query<'static, Postgres, PgArguments> {
    let mut query = sqlx::query(statement.sql());
    for param in statement.params() {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Int(v) => query.bind(v),
            Value::Bool(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
        };
    }
    query
}

/// Maps a driver row onto driver-independent values by column type.
fn decode_row(row: &PgRow) -> StoreResult<Row> {
    let mut values = Vec::with_capacity(row.len());

    for column in row.columns() {
        let index = column.ordinal();
        let decode_error = |e: sqlx::Error| StoreError::Decode {
            column: column.name().to_string(),
            message: e.to_string(),
        };

        let value = match column.type_info().name() {
            "INT8" => row
                .try_get::<Option<i64>, _>(index)
                .map_err(decode_error)?
                .map_or(Value::Null, Value::Int),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)
                .map_err(decode_error)?
                .map_or(Value::Null, |v| Value::Int(i64::from(v))),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)
                .map_err(decode_error)?
                .map_or(Value::Null, |v| Value::Int(i64::from(v))),
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)
                .map_err(decode_error)?
                .map_or(Value::Null, Value::Bool),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(index)
                .map_err(decode_error)?
                .map_or(Value::Null, Value::Text),
            other => {
                return Err(StoreError::Decode {
                    column: column.name().to_string(),
                    message: format!("unsupported column type {other}"),
                });
            }
        };
        values.push(value);
    }

    Ok(Row::new(values))
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                StoreError::from_sqlstate(code, db.message())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => StoreError::Connect(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Decode {
                column: String::from("?"),
                message: err.to_string(),
            },
            other => StoreError::Statement {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

/// Live tests; they run only when `ISOLAB_TEST_PG_URL` names a scratch database.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;

    fn test_url() -> Option<String> {
        std::env::var("ISOLAB_TEST_PG_URL").ok()
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        let options = ConnectOptions {
            max_connections: 1,
            connect_timeout: std::time::Duration::from_millis(500),
        };
        let err = PgStore::connect("postgres://isolab@127.0.0.1:1/isolab", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Connect(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn seeds_and_reads_back_accounts() {
        let Some(url) = test_url() else { return };
        let store = PgStore::connect(&url, &ConnectOptions::default()).await.unwrap();

        for statement in [
            Statement::DropTable(Dataset::Accounts),
            Statement::CreateTable(Dataset::Accounts),
            Statement::SeedRows(Dataset::Accounts),
        ] {
            store.execute(&statement).await.unwrap();
        }

        let rows = store
            .query_rows(&Statement::SelectRows(Dataset::Accounts))
            .await
            .unwrap();
        assert_eq!(rows, Dataset::Accounts.seed_rows());
        assert_eq!(store.query_scalar(&Statement::SumUnbilled).await.unwrap(), 100);

        store.close().await;
    }

    #[tokio::test]
    async fn missing_table_is_not_a_conflict() {
        let Some(url) = test_url() else { return };
        let store = PgStore::connect(&url, &ConnectOptions::default()).await.unwrap();
        store
            .execute(&Statement::DropTable(Dataset::Availability))
            .await
            .unwrap();

        let mut session = store.begin(Some(IsolationLevel::Serializable)).await.unwrap();
        let err = session.query_scalar(&Statement::SumAvailable).await.unwrap_err();
        assert_eq!(err.code(), Some("42P01"));
        assert!(!err.is_conflict());
        session.rollback().await.unwrap();

        store.close().await;
    }
}
