//! Error types for store access and scenario runs.

use thiserror::Error;

use crate::dataset::{Dataset, PrepStep};
use crate::store::Row;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// SQLSTATEs after which the store has certainly rolled the transaction back
/// and a retry could succeed.
const CONFLICT_CODES: &[&str] = &[
    "40000", // transaction_rollback
    "40001", // serialization_failure, CockroachDB's "restart transaction"
    "40P01", // deadlock_detected
];

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the connection.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The store aborted the transaction because it could not be serialized.
    ///
    /// Expected under strict isolation; the caller should roll back and
    /// record the conflict rather than treat it as fatal.
    #[error("serialization conflict (SQLSTATE {code}): {message}")]
    Conflict { code: String, message: String },

    /// A statement failed for any other reason.
    #[error("statement failed ({}): {message}", .code.as_deref().unwrap_or("no SQLSTATE"))]
    Statement {
        code: Option<String>,
        message: String,
    },

    /// A result column could not be mapped onto a [`crate::store::Value`].
    #[error("failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    /// The connection URL names a backend this build does not know.
    #[error("unsupported store URL '{0}' (expected postgres://, postgresql:// or memory://)")]
    UnsupportedUrl(String),
}

impl StoreError {
    /// Classifies a store-reported failure by its SQLSTATE code.
    ///
    /// Only the codes in [`CONFLICT_CODES`] are conflicts. Other class `40`
    /// codes stay statement errors: after `40003` (completion unknown) the
    /// commit may have landed, and `40002` is a constraint violation. The
    /// message text is never inspected.
    pub fn from_sqlstate(code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Some(code) if CONFLICT_CODES.contains(&code.as_str()) => {
                Self::Conflict { code, message }
            }
            code => Self::Statement { code, message },
        }
    }

    /// Returns true if the store asked for the transaction to be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns the SQLSTATE code, if the store reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Conflict { code, .. } => Some(code),
            Self::Statement { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Errors that end a scenario run against one target early.
///
/// None of them is fatal for the process: the caller moves on to the
/// next configured target.
#[derive(Debug, Error)]
pub enum RunError {
    /// The target store could not be opened.
    #[error("cannot reach target '{target}': {source}")]
    Connection {
        target: String,
        #[source]
        source: StoreError,
    },

    /// A DDL/DML statement of the dataset reset failed.
    #[error("failed to prepare dataset '{dataset}' on '{target}' during {step}: {source}")]
    SchemaPrep {
        target: String,
        dataset: Dataset,
        step: PrepStep,
        #[source]
        source: StoreError,
    },

    /// The freshly seeded table does not read back as its literal seed.
    #[error(
        "dataset '{dataset}' on '{target}' does not match its seed after preparation ({} rows expected, {} found)",
        .expected.len(),
        .actual.len()
    )]
    SeedMismatch {
        target: String,
        dataset: Dataset,
        expected: Vec<Row>,
        actual: Vec<Row>,
    },
}

impl RunError {
    /// Returns true for failures of the dataset reset (including read-back).
    pub fn is_schema_prep(&self) -> bool {
        matches!(self, Self::SchemaPrep { .. } | Self::SeedMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn serialization_failure_is_conflict() {
        let err = StoreError::from_sqlstate(Some("40001".to_string()), "restart transaction");
        assert!(err.is_conflict());
        assert_eq!(err.code(), Some("40001"));
    }

    #[test_case("40000" ; "transaction rollback")]
    #[test_case("40P01" ; "deadlock")]
    fn rollback_codes_are_conflicts(code: &str) {
        let err = StoreError::from_sqlstate(Some(code.to_string()), "rolled back");
        assert!(err.is_conflict());
    }

    #[test_case("40002", "insert violates foreign key constraint" ; "integrity violation")]
    #[test_case("40003", "result is ambiguous" ; "completion unknown")]
    fn other_rollback_class_codes_are_not_conflicts(code: &str, message: &str) {
        let err = StoreError::from_sqlstate(Some(code.to_string()), message);
        assert!(!err.is_conflict());
        assert!(matches!(err, StoreError::Statement { .. }));
        assert_eq!(err.code(), Some(code));
    }

    #[test]
    fn prep_errors_name_the_target() {
        let err = RunError::SchemaPrep {
            target: "CockroachDB".to_string(),
            dataset: Dataset::Accounts,
            step: PrepStep::Create,
            source: StoreError::from_sqlstate(Some("42501".to_string()), "permission denied"),
        };
        assert!(err.to_string().contains("on 'CockroachDB' during create"));

        let err = RunError::SeedMismatch {
            target: "PostgreSQL".to_string(),
            dataset: Dataset::Availability,
            expected: Dataset::Availability.seed_rows(),
            actual: Vec::new(),
        };
        assert!(err.to_string().contains("'availability' on 'PostgreSQL'"));
    }

    #[test]
    fn message_text_does_not_make_a_conflict() {
        let err = StoreError::from_sqlstate(
            Some("42P01".to_string()),
            "pq: restart transaction: relation does not exist",
        );
        assert!(!err.is_conflict());
        assert_eq!(err.code(), Some("42P01"));
    }

    #[test]
    fn missing_code_is_a_statement_error() {
        let err = StoreError::from_sqlstate(None, "connection reset");
        assert!(matches!(err, StoreError::Statement { code: None, .. }));
        assert!(err.to_string().contains("no SQLSTATE"));
    }
}
