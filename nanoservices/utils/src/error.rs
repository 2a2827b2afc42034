use std::fmt;

use thiserror::Error;
use reqwest::Error as ReqwestError;
use rusqlite::Error as SqliteError;
use tokio::io::Error as TokioIoError;
use tokio_postgres::Error as PostgresError;
use url::ParseError;

/// Top-level error for a pipeline run.
///
/// Each stage has its own error type; they are wrapped here without being
/// rewritten so the caller (usually the scheduler) sees the original cause.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Extraction Error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Transformation Error: {0}")]
    Transformation(#[from] TransformationError),

    #[error("Load Error: {0}")]
    Load(#[from] LoadError),

    #[error("Run Store Error: {0}")]
    Store(#[from] SqliteError),

    #[error("Tokio Error: {0}")]
    TokioError(#[from] TokioIoError),
}

impl Error {
    /// Name of the pipeline stage that produced this error, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Error::Extraction(_) => Some("extract"),
            Error::Transformation(_) => Some("transform"),
            Error::Load(_) => Some("load"),
            Error::Store(_) | Error::TokioError(_) => None,
        }
    }
}

/// Network or HTTP failure while fetching the source document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid source url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: ReqwestError,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: ReqwestError,
    },
}

/// Source data that does not fit the fixed record shape.
#[derive(Debug, Error, PartialEq)]
pub enum TransformationError {
    #[error("expected a JSON array of entities, found {found}")]
    NotAnArray { found: &'static str },

    #[error("entity {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("entity {index} field '{field}' should be {expected}, found {found}")]
    WrongType {
        index: usize,
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("entity {index} field '{field}' value {value} does not fit a 64-bit signed integer")]
    OutOfRange {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// The warehouse operation a [`LoadError`] happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Connect,
    Begin,
    DropTable,
    CreateTable,
    Insert,
    Commit,
    Rollback,
}

impl fmt::Display for LoadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadStep::Connect => "connect",
            LoadStep::Begin => "begin",
            LoadStep::DropTable => "drop table",
            LoadStep::CreateTable => "create table",
            LoadStep::Insert => "insert",
            LoadStep::Commit => "commit",
            LoadStep::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Any DDL, DML or transaction failure in the load step.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid SQL identifier '{0}': expected [A-Za-z_][A-Za-z0-9_]* of at most 127 bytes")]
    InvalidIdentifier(String),

    #[error("sqlite {step} failed: {source}")]
    Sqlite {
        step: LoadStep,
        #[source]
        source: SqliteError,
    },

    #[error("postgres {step} failed: {source}")]
    Postgres {
        step: LoadStep,
        #[source]
        source: PostgresError,
    },

    #[error("{step} failed: {message}")]
    Backend { step: LoadStep, message: String },

    #[error("illegal load transition {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        cause: Box<LoadError>,
        rollback: Box<LoadError>,
    },
}

impl LoadError {
    pub fn sqlite(step: LoadStep) -> impl FnOnce(SqliteError) -> LoadError {
        move |source| LoadError::Sqlite { step, source }
    }

    pub fn postgres(step: LoadStep) -> impl FnOnce(PostgresError) -> LoadError {
        move |source| LoadError::Postgres { step, source }
    }

    /// The step that failed, looking through a failed rollback to the original cause.
    pub fn step(&self) -> Option<LoadStep> {
        match self {
            LoadError::Sqlite { step, .. }
            | LoadError::Postgres { step, .. }
            | LoadError::Backend { step, .. } => Some(*step),
            LoadError::RollbackFailed { cause, .. } => cause.step(),
            LoadError::InvalidIdentifier(_) | LoadError::IllegalTransition { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_follows_error_kind() {
        let err: Error = TransformationError::MissingField { index: 3, field: "area" }.into();
        assert_eq!(err.stage(), Some("transform"));
        assert_eq!(
            err.to_string(),
            "Transformation Error: entity 3 is missing required field 'area'"
        );

        let err: Error = LoadError::Backend { step: LoadStep::Insert, message: "boom".into() }.into();
        assert_eq!(err.stage(), Some("load"));
    }

    #[test]
    fn rollback_failure_keeps_original_step() {
        let err = LoadError::RollbackFailed {
            cause: Box::new(LoadError::Backend { step: LoadStep::Insert, message: "constraint".into() }),
            rollback: Box::new(LoadError::Backend { step: LoadStep::Rollback, message: "gone".into() }),
        };
        assert_eq!(err.step(), Some(LoadStep::Insert));
        assert!(err.to_string().contains("rollback also failed"));
    }
}
