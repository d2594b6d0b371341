//! # gitops-core: Entity Model for the GitOps Persistence Layer
//!
//! This crate holds the records that describe who may drive which GitOps
//! engine against which cluster. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     GitOps Control Plane                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │           REST facade / Kubernetes reconcilers (external)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 gitops-db (query engines)                       │   │
//! │  │        ScopedQueries  ·  UnsafeQueries  ·  DbError              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ gitops-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌──────────────┐  ┌───────────┐               │   │
//! │  │   │   types   │  │  validation  │  │   error   │               │   │
//! │  │   │  records  │  │  key checks  │  │ Validation│               │   │
//! │  │   └───────────┘  └──────────────┘  └───────────┘               │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entity records (ClusterUser, Application, Operation, ...)
//! - [`validation`] - Key and field checks run before any store round trip
//! - [`error`] - Validation error type
//!
//! ## Example Usage
//!
//! ```rust
//! use gitops_core::validation::Validate;
//! use gitops_core::ClusterAccess;
//!
//! let access = ClusterAccess {
//!     user_id: "u1".to_string(),
//!     managed_environment_id: "env1".to_string(),
//!     gitops_engine_instance_id: String::new(),
//! };
//!
//! // Every component of the composite key is required.
//! assert!(access.validate().is_err());
//! ```

pub mod error;
pub mod types;
pub mod validation;

pub use error::ValidationError;
pub use types::*;

/// Maximum length of any primary or foreign key.
///
/// Keys are opaque strings; the bound matches the `VARCHAR(48)` key columns
/// used by the control plane's relational schema.
pub const MAX_ID_LEN: usize = 48;

/// Maximum length of display names and namespace names.
pub const MAX_NAME_LEN: usize = 256;
