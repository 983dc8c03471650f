//! The closed set of statements the harness issues.
//!
//! Every statement renders to SQL text with positional (`$n`) parameters, so
//! any PostgreSQL-wire client can run it. Backends that do not speak SQL
//! interpret the variant instead.

use crate::dataset::Dataset;

use super::Value;

/// A statement issued against a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement {
    /// Drops the dataset's table if it exists.
    DropTable(Dataset),
    /// Creates the dataset's table.
    CreateTable(Dataset),
    /// Inserts the dataset's literal seed rows.
    SeedRows(Dataset),
    /// Reads every row of the dataset's table, ordered by id.
    SelectRows(Dataset),
    /// Lists `(id, price)` of every account not yet billed.
    ListUnbilled,
    /// Sums the price of every account not yet billed.
    SumUnbilled,
    /// Marks every account with the given price as billed.
    BillAtPrice(i64),
    /// Sums the availability flag over all doctors.
    SumAvailable,
    /// Marks one doctor as unavailable.
    MarkUnavailable(i64),
}

impl Statement {
    /// Returns the SQL text of this statement.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::DropTable(Dataset::Accounts) => "DROP TABLE IF EXISTS accounts",
            Self::DropTable(Dataset::Availability) => "DROP TABLE IF EXISTS availability",
            Self::CreateTable(Dataset::Accounts) => {
                "CREATE TABLE accounts (\
                 id BIGINT PRIMARY KEY, \
                 price BIGINT NOT NULL, \
                 isBilled BOOLEAN NOT NULL DEFAULT FALSE)"
            }
            Self::CreateTable(Dataset::Availability) => {
                "CREATE TABLE availability (\
                 id BIGINT PRIMARY KEY, \
                 name VARCHAR(255) NOT NULL, \
                 isAvailable BIGINT NOT NULL)"
            }
            Self::SeedRows(Dataset::Accounts) => {
                "INSERT INTO accounts (id, price) VALUES \
                 (1, 10), (2, 20), (3, 10), (4, 20), (5, 10), (6, 20), (7, 10)"
            }
            Self::SeedRows(Dataset::Availability) => {
                "INSERT INTO availability (id, name, isAvailable) VALUES \
                 (1, 'Doctor 1', 1), (2, 'Doctor 2', 0), (3, 'Doctor 3', 0), (4, 'Doctor 4', 1)"
            }
            Self::SelectRows(Dataset::Accounts) => {
                "SELECT id, price, isBilled FROM accounts ORDER BY id"
            }
            Self::SelectRows(Dataset::Availability) => {
                "SELECT id, name, isAvailable FROM availability ORDER BY id"
            }
            Self::ListUnbilled => "SELECT id, price FROM accounts WHERE isBilled = FALSE ORDER BY id",
            Self::SumUnbilled => {
                "SELECT CAST(COALESCE(SUM(price), 0) AS BIGINT) FROM accounts WHERE isBilled = FALSE"
            }
            Self::BillAtPrice(_) => "UPDATE accounts SET isBilled = TRUE WHERE price = $1",
            Self::SumAvailable => {
                "SELECT CAST(COALESCE(SUM(isAvailable), 0) AS BIGINT) FROM availability"
            }
            Self::MarkUnavailable(_) => "UPDATE availability SET isAvailable = 0 WHERE id = $1",
        }
    }

    /// Returns the positional parameters, in `$1, $2, ...` order.
    pub fn params(&self) -> Vec<Value> {
        match self {
            Self::BillAtPrice(price) => vec![Value::Int(*price)],
            Self::MarkUnavailable(id) => vec![Value::Int(*id)],
            _ => Vec::new(),
        }
    }

    /// Returns the dataset this statement touches.
    pub fn dataset(&self) -> Dataset {
        match self {
            Self::DropTable(dataset)
            | Self::CreateTable(dataset)
            | Self::SeedRows(dataset)
            | Self::SelectRows(dataset) => *dataset,
            Self::ListUnbilled | Self::SumUnbilled | Self::BillAtPrice(_) => Dataset::Accounts,
            Self::SumAvailable | Self::MarkUnavailable(_) => Dataset::Availability,
        }
    }

    /// Returns true for schema statements (drop/create).
    pub fn is_ddl(&self) -> bool {
        matches!(self, Self::DropTable(_) | Self::CreateTable(_))
    }
}
