//! Typed error type for the pg crate.
//!
//! Driver failures are classified exactly once, at the sqlx boundary
//! ([`PgError::from`]). Callers branch on [`PgError::kind`] or on the
//! predicates below, never on `sqlx` types.

use thiserror::Error;

/// SQLSTATE codes the rest of the workspace branches on.
pub mod codes {
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const EXCLUSION_VIOLATION: &str = "23P01";
    pub const INVALID_SCHEMA_NAME: &str = "3F000";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";

    /// Integrity constraint violations all live in SQLSTATE class `23`.
    pub fn is_integrity_class(code: &str) -> bool {
        code.starts_with("23")
    }
}

/// Coarse classification of a [`PgError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ConstraintViolation,
    Connection,
    Other,
}

#[derive(Debug, Error)]
pub enum PgError {
    /// Zero rows matched an operation that expected one.
    #[error("row not found")]
    NotFound,

    /// The server rejected a statement for violating an integrity constraint.
    #[error("constraint violation [{code}]{}: {message}", constraint.as_deref().map(|c| format!(" on '{c}'")).unwrap_or_default())]
    ConstraintViolation {
        code: String,
        constraint: Option<String>,
        message: String,
    },

    /// Any other server-reported error. The SQLSTATE code is kept so that
    /// [`PgError::is_code`] still works on it.
    #[error("database error [{code}]: {message}")]
    Server { code: String, message: String },

    /// Pool, begin, commit or rollback failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The underlying transaction was already committed or rolled back.
    #[error("transaction already closed")]
    TxClosed,

    /// A returned row could not be decoded into the requested type.
    #[error("row decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("database error: {0}")]
    Other(String),
}

impl PgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Self::Connection(_) | Self::TxClosed => ErrorKind::Connection,
            Self::Server { .. } | Self::Decode(_) | Self::Migration(_) | Self::Other(_) => {
                ErrorKind::Other
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// True when the server reported exactly this SQLSTATE `code`.
    pub fn is_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }

    /// True when this is a violation of `constraint` with SQLSTATE `code`.
    pub fn is_constraint(&self, code: &str, constraint: &str) -> bool {
        match self {
            Self::ConstraintViolation {
                code: c,
                constraint: Some(name),
                ..
            } => c == code && name == constraint,
            _ => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::ConstraintViolation { code, .. } | Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Build an error from a server-reported SQLSTATE, picking the
    /// constraint variant for class `23`.
    pub fn from_server(code: impl Into<String>, constraint: Option<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if codes::is_integrity_class(&code) {
            Self::ConstraintViolation {
                code,
                constraint,
                message,
            }
        } else {
            Self::Server { code, message }
        }
    }
}

impl From<sqlx::Error> for PgError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) => match db.code() {
                Some(code) => Self::from_server(
                    code.into_owned(),
                    db.constraint().map(str::to_owned),
                    db.message(),
                ),
                None => Self::Other(db.message().to_owned()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_)
            | sqlx::Error::Protocol(_) => Self::Connection(err.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_classified_as_constraint() {
        let err = PgError::from_server(
            codes::UNIQUE_VIOLATION,
            Some("movies_title_key".into()),
            "duplicate key value violates unique constraint",
        );
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert!(err.is_code(codes::UNIQUE_VIOLATION));
        assert!(err.is_constraint(codes::UNIQUE_VIOLATION, "movies_title_key"));
        assert!(!err.is_constraint(codes::UNIQUE_VIOLATION, "other_key"));
        assert!(!err.is_constraint(codes::FOREIGN_KEY_VIOLATION, "movies_title_key"));
        assert!(err.to_string().contains("movies_title_key"));
    }

    #[test]
    fn non_integrity_codes_stay_inspectable() {
        let err = PgError::from_server(codes::INVALID_SCHEMA_NAME, None, "schema does not exist");
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.is_code(codes::INVALID_SCHEMA_NAME));
        assert!(!err.is_constraint(codes::INVALID_SCHEMA_NAME, ""));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: PgError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.code(), None);
    }

    #[test]
    fn pool_timeout_is_a_connection_error() {
        let err: PgError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(PgError::TxClosed.kind(), ErrorKind::Connection);
    }
}
