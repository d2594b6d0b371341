//! # Database Error Types
//!
//! Error types and the error classifier shared by both query engines.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Classification                                 │
//! │                                                                         │
//! │  ValidationError (gitops-core) ──► DbError::InvalidArgument            │
//! │  Owner mismatch on create      ──► DbError::Forbidden                  │
//! │  Unsafe call without opt-in    ──► DbError::UnsafeNotAllowed           │
//! │                                                                         │
//! │  sqlx::Error ──► From<sqlx::Error> (the classifier)                    │
//! │       │                                                                 │
//! │       ├── RowNotFound                 → NotFound                       │
//! │       ├── UNIQUE / PRIMARY KEY        → UniqueViolation                │
//! │       ├── other constraint            → ConstraintViolation            │
//! │       ├── SQLITE_BUSY / SQLITE_LOCKED → ConnectionFailed               │
//! │       ├── pool timeout / closed / io  → StoreUnavailable kinds         │
//! │       └── everything else             → Internal                       │
//! │                                                                         │
//! │  QueryContext cancelled / expired ──► Canceled / DeadlineExceeded      │
//! │                                                                         │
//! │  Callers branch on DbError::kind(), never on message text.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use gitops_core::ValidationError;
use thiserror::Error;

/// Classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty or malformed key supplied by the caller. Never retryable.
    InvalidArgument,
    /// Owner mismatch detected before reaching the store.
    Forbidden,
    /// Privileged call on an engine built without the unsafe opt-in.
    PermissionDenied,
    /// No row matched, or the caller may not see it. The two are the same.
    NotFound,
    /// Unique key or other constraint violation.
    Conflict,
    /// Pool closed, exhausted or unreachable. The only retryable kind.
    StoreUnavailable,
    /// Caller's context was cancelled or its deadline passed.
    Canceled,
    /// Anything the classifier could not place.
    Unexpected,
}

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Caller-supplied key or field failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    /// The caller tried to act on behalf of another user.
    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    /// A privileged operation was invoked on an engine constructed without
    /// the unsafe flag.
    #[error("Unsafe operation not allowed: {operation}")]
    UnsafeNotAllowed { operation: &'static str },

    /// Entity not found, or not visible to the caller.
    ///
    /// ## When This Occurs
    /// - Keyed lookup matched zero rows
    /// - Authorization predicate excluded the row
    /// - Whole-row update matched zero rows
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Creating a row whose primary key exists
    /// - Creating a duplicate ClusterAccess triple
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// NOT NULL / CHECK / FOREIGN KEY violation.
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// Database connection failed or the pool was closed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Pool exhausted (all connections in use past the acquire timeout).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The caller cancelled the context.
    #[error("Operation canceled")]
    Canceled,

    /// The caller's deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Forbidden error.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        DbError::Forbidden {
            reason: reason.into(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DbError::Forbidden { .. } => ErrorKind::Forbidden,
            DbError::UnsafeNotAllowed { .. } => ErrorKind::PermissionDenied,
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::UniqueViolation { .. } | DbError::ConstraintViolation { .. } => {
                ErrorKind::Conflict
            }
            DbError::ConnectionFailed(_) | DbError::PoolExhausted => ErrorKind::StoreUnavailable,
            DbError::Canceled | DbError::DeadlineExceeded => ErrorKind::Canceled,
            DbError::MigrationFailed(_) | DbError::QueryFailed(_) | DbError::Internal(_) => {
                ErrorKind::Unexpected
            }
        }
    }

    /// True for NotFound only.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True when a caller may reasonably retry the same call.
    ///
    /// Only infrastructure failures qualify; the engines never retry
    /// internally.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }
}

/// Distinguishes "not found" (including "not yours") from every other
/// failure without inspecting error text.
pub fn is_result_not_found_error(err: &DbError) -> bool {
    err.is_not_found()
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → constraint kind, busy/locked →
///                               ConnectionFailed, else QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed     → DbError::ConnectionFailed
/// Io / Tls / Protocol / Crash → DbError::ConnectionFailed
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();

                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => unique_violation(&msg),
                    sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => {
                        DbError::ConstraintViolation { message: msg }
                    }
                    // SQLite reports primary-key and unique failures with the
                    // same message prefix; some drivers lose the extended code.
                    _ if msg.contains("UNIQUE constraint failed") => unique_violation(&msg),
                    _ if msg.contains("constraint failed") => {
                        DbError::ConstraintViolation { message: msg }
                    }
                    // Lock wait ran past busy_timeout: the store is contended,
                    // the statement itself is fine.
                    _ if is_busy(db_err.code().as_deref(), &msg) => DbError::ConnectionFailed(msg),
                    _ => DbError::QueryFailed(msg),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::Io(e) => DbError::ConnectionFailed(e.to_string()),

            sqlx::Error::Tls(e) => DbError::ConnectionFailed(e.to_string()),

            sqlx::Error::Protocol(msg) => DbError::ConnectionFailed(msg),

            sqlx::Error::WorkerCrashed => {
                DbError::ConnectionFailed("Database worker crashed".to_string())
            }

            _ => DbError::Internal(err.to_string()),
        }
    }
}

// "UNIQUE constraint failed: clusteraccess.user_id, clusteraccess.managed_environment_id"
fn unique_violation(msg: &str) -> DbError {
    let field = msg
        .split("UNIQUE constraint failed: ")
        .nth(1)
        .unwrap_or("unknown")
        .to_string();
    DbError::UniqueViolation {
        field,
        value: "unknown".to_string(),
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

// sqlx reports the extended result code; the primary code is its low byte
// (517 SQLITE_BUSY_SNAPSHOT → 5, 262 SQLITE_LOCKED_SHAREDCACHE → 6).
fn is_busy(code: Option<&str>, msg: &str) -> bool {
    match code.and_then(|c| c.parse::<i32>().ok()) {
        Some(code) => matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED),
        None => msg.contains("database is locked") || msg.contains("database table is locked"),
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_is_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(is_result_not_found_error(&err));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_pool_errors_are_retryable() {
        let closed: DbError = sqlx::Error::PoolClosed.into();
        assert_eq!(closed.kind(), ErrorKind::StoreUnavailable);
        assert!(closed.is_retryable());

        let timed_out: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(timed_out, DbError::PoolExhausted));
        assert!(timed_out.is_retryable());

        let io: DbError =
            sqlx::Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).into();
        assert_eq!(io.kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn test_only_store_unavailable_is_retryable() {
        let errors = [
            DbError::from(ValidationError::required("id")),
            DbError::forbidden("owner mismatch"),
            DbError::UnsafeNotAllowed { operation: "list" },
            DbError::Canceled,
            DbError::DeadlineExceeded,
            DbError::Internal("boom".to_string()),
        ];
        for err in &errors {
            assert!(!err.is_retryable(), "{err} should not be retryable");
            assert!(!is_result_not_found_error(err), "{err} is not a not-found");
        }

        let missing = DbError::not_found("Application", "app1");
        assert!(!missing.is_retryable());
        assert!(is_result_not_found_error(&missing));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            DbError::from(ValidationError::required("id")).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(DbError::forbidden("x").kind(), ErrorKind::Forbidden);
        assert_eq!(
            DbError::UnsafeNotAllowed { operation: "x" }.kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(DbError::DeadlineExceeded.kind(), ErrorKind::Canceled);
        assert_eq!(
            DbError::UniqueViolation {
                field: "f".to_string(),
                value: "v".to_string()
            }
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_busy_and_locked_codes() {
        assert!(is_busy(Some("5"), "database is locked"));
        assert!(is_busy(Some("6"), "database table is locked"));
        assert!(is_busy(Some("517"), "database is locked"));
        assert!(is_busy(Some("262"), "database table is locked"));
        assert!(is_busy(None, "database is locked"));

        assert!(!is_busy(Some("1"), "no such table: clusteruser"));
        assert!(!is_busy(Some("2067"), "UNIQUE constraint failed: clusteruser.id"));
        assert!(!is_busy(None, "no such table: clusteruser"));
    }

    #[tokio::test]
    async fn test_held_write_lock_is_store_unavailable() {
        use sqlx::Connection;

        use crate::pool::{Database, DbConfig};
        use crate::QueryContext;

        let path = std::env::temp_dir().join(format!("gitops-busy-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(
            DbConfig::new(&path)
                .max_connections(2)
                .busy_timeout(std::time::Duration::from_millis(50)),
        )
        .await
        .unwrap();

        let mut holder =
            sqlx::SqliteConnection::connect(&format!("sqlite://{}", path.display()))
                .await
                .unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut holder)
            .await
            .unwrap();

        let err = db
            .scoped()
            .delete_operation_by_id(&QueryContext::background(), "op1", "u1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable, "{err}");
        assert!(err.is_retryable());

        sqlx::query("ROLLBACK").execute(&mut holder).await.unwrap();
        holder.close().await.unwrap();
        db.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unique_violation_field_parsing() {
        let err = unique_violation("UNIQUE constraint failed: clusteruser.id");
        match err {
            DbError::UniqueViolation { field, .. } => assert_eq!(field, "clusteruser.id"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
