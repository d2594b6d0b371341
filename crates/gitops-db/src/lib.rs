//! # gitops-db: Database Layer for the GitOps Control Plane
//!
//! Ownership-scoped and privileged query engines over SQLite, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     GitOps Control Plane Data Flow                      │
//! │                                                                         │
//! │  REST facade (caller id known)        Reconcilers / fixtures           │
//! │       │                                       │                         │
//! │       ▼                                       ▼                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     gitops-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │    queries    │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ ScopedQueries │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ UnsafeQueries │    │ 001_initial  │  │   │
//! │  │   │ lifecycle     │    │               │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   QueryContext (cancel / deadline)    DbError + ErrorKind       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation, configuration and engine handles
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Error types and the sqlx error classifier
//! - [`context`] - Per-call cancellation and deadlines
//! - [`queries`] - Scoped and privileged query engines
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gitops_db::{Database, DbConfig, QueryContext};
//!
//! let db = Database::new(DbConfig::new("gitops.db")).await?;
//! let ctx = QueryContext::background().with_timeout(Duration::from_secs(5));
//!
//! // Request path: the caller's identity scopes every statement.
//! let app = db.scoped().get_application_by_id(&ctx, "app1", user_id).await?;
//!
//! // Reconciler: explicit opt-in.
//! let everything = db.unsafe_queries(true).list_all_applications(&ctx).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod context;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod queries;

// =============================================================================
// Re-exports
// =============================================================================

pub use context::{CancelHandle, QueryContext};
pub use error::{is_result_not_found_error, DbError, DbResult, ErrorKind};
pub use pool::{Database, DbConfig};

// Engine re-exports for convenience
pub use queries::{ScopedQueries, UnsafeQueries};
