// src/error.rs
use std::fmt;

/// Error taxonomy for the ledger core. Variants map 1:1 onto the kinds a
/// transport layer needs to distinguish: everything except `TransientConflict`
/// propagates to the caller unchanged; `TransientConflict` is retried by the
/// transfer engine before ever reaching a caller.
#[derive(Debug)]
pub enum LedgerError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    TransientConflict(String),
    Timeout(String),
    Internal(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransientConflict(_))
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Unprocessable(msg) => write!(f, "unprocessable: {msg}"),
            Self::TransientConflict(msg) => write!(f, "transient conflict: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Classifies a storage-native error at the boundary, per the propagation
/// policy in the error handling design: unique/foreign-key/check violations
/// and serialization failures are recognized by SQLSTATE code and turned into
/// the matching taxonomy member; anything else becomes `Internal` and is
/// logged here so the surfaced error stays a plain message.
pub fn classify_sqlx(err: sqlx::Error) -> LedgerError {
    use sqlx::Error as SqlxError;

    match &err {
        SqlxError::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string());
            match code.as_deref() {
                // serialization_failure / deadlock_detected
                Some("40001") | Some("40P01") => {
                    LedgerError::TransientConflict(db_err.message().to_string())
                }
                // unique_violation
                Some("23505") => LedgerError::Conflict(db_err.message().to_string()),
                // foreign_key_violation
                Some("23503") => LedgerError::NotFound(db_err.message().to_string()),
                // check_violation
                Some("23514") => LedgerError::BadRequest(db_err.message().to_string()),
                _ => {
                    tracing::error!(error = %db_err, "unclassified database error");
                    LedgerError::Internal(db_err.message().to_string())
                }
            }
        }
        SqlxError::PoolTimedOut => LedgerError::Timeout("connection pool exhausted".to_string()),
        SqlxError::RowNotFound => LedgerError::NotFound("row not found".to_string()),
        other => {
            tracing::error!(error = %other, "unclassified storage error");
            LedgerError::Internal(other.to_string())
        }
    }
}
