//! # Domain Types
//!
//! Records stored by the GitOps persistence layer.
//!
//! ## Ownership Chain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Entity Relationships                            │
//! │                                                                         │
//! │  ┌─────────────────┐         ┌──────────────────────┐                  │
//! │  │  ClusterUser    │◄────────│    ClusterAccess     │                  │
//! │  │  id             │         │  user_id             │                  │
//! │  └─────────────────┘         │  managed_env_id   ───┼──┐               │
//! │                              │  engine_instance_id ─┼┐ │               │
//! │                              └──────────────────────┘│ │               │
//! │  ┌─────────────────────┐                             │ │               │
//! │  │ GitOpsEngineInstance│◄────────────────────────────┘ │               │
//! │  │  enginecluster_id ──┼──► GitOpsEngineCluster        │               │
//! │  └─────────────────────┘        │                      │               │
//! │                                 ▼                      ▼               │
//! │                        ClusterCredentials ◄── ManagedEnvironment       │
//! │                                                                         │
//! │  Application (env, instance) ── owned through ClusterAccess            │
//! │  ├── ApplicationState (1:1)                                            │
//! │  └── DeploymentToApplicationMapping (N:1)                              │
//! │                                                                         │
//! │  Operation ── owned through owner_user_id (no ClusterAccess)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identifiers are opaque strings. Field names match the column names of the
//! relational schema so rows map onto records without renaming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

// =============================================================================
// Users and Credentials
// =============================================================================

/// A tenant user of the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ClusterUser {
    /// Unique user identifier.
    pub id: String,

    /// Display name.
    pub user_name: String,
}

/// Credentials for reaching a Kubernetes cluster.
///
/// Has no owner column: a scoped caller reaches it only through a
/// [`ManagedEnvironment`] or [`GitOpsEngineCluster`] it already has access to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ClusterCredentials {
    pub id: String,
    pub host: String,
    pub kube_config: String,
    pub kube_config_context: String,
    pub serviceaccount_bearer_token: String,
    pub serviceaccount_ns: String,
}

// Keep secrets out of logs.
impl fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("kube_config", &"<redacted>")
            .field("kube_config_context", &self.kube_config_context)
            .field("serviceaccount_bearer_token", &"<redacted>")
            .field("serviceaccount_ns", &self.serviceaccount_ns)
            .finish()
    }
}

// =============================================================================
// GitOps Engine
// =============================================================================

/// A cluster hosting one or more GitOps engine instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct GitOpsEngineCluster {
    pub id: String,

    /// Credentials used to reach the cluster.
    pub clustercredentials_id: String,
}

/// A GitOps engine (Argo CD style controller) running in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct GitOpsEngineInstance {
    pub id: String,
    pub namespace_name: String,
    pub namespace_uid: String,

    /// The [`GitOpsEngineCluster`] hosting this instance.
    pub enginecluster_id: String,
}

/// A cluster (or namespace set) that a GitOps engine deploys into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ManagedEnvironment {
    pub id: String,
    pub name: String,
    pub clustercredentials_id: String,
}

/// The authorization join row.
///
/// Its existence means `user_id` may use `gitops_engine_instance_id` against
/// `managed_environment_id`. The three fields together are the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ClusterAccess {
    pub user_id: String,
    pub managed_environment_id: String,
    pub gitops_engine_instance_id: String,
}

// =============================================================================
// Applications
// =============================================================================

/// A declarative application deployed by an engine instance into an
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Application {
    pub id: String,
    pub name: String,

    /// Opaque spec payload, stored and returned unmodified.
    pub spec_field: String,

    pub engine_instance_id: String,
    pub managed_environment_id: String,
}

/// Observed state of an [`Application`], keyed by the application id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ApplicationState {
    pub application_id: String,

    /// Opaque state payload, stored and returned unmodified.
    pub state: String,
}

/// Links an external deployment resource to an [`Application`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DeploymentToApplicationMapping {
    /// Identifier (uid) of the external deployment resource.
    pub id: String,
    pub application_id: String,
}

// =============================================================================
// Operations
// =============================================================================

/// Lifecycle of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Queued, not yet picked up by a reconciler.
    Waiting,
    InProgress,
    Completed,
    Failed,
}

impl OperationState {
    /// All states, in lifecycle order.
    pub const ALL: [OperationState; 4] = [
        OperationState::Waiting,
        OperationState::InProgress,
        OperationState::Completed,
        OperationState::Failed,
    ];

    /// Returns the stored representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationState::Waiting => "waiting",
            OperationState::InProgress => "in_progress",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        }
    }

    /// True once the operation can no longer change state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "state".to_string(),
                allowed: OperationState::ALL
                    .iter()
                    .map(|state| state.as_str().to_string())
                    .collect(),
            })
    }
}

/// A unit of work targeting a resource on an engine instance.
///
/// Owned directly through `owner_user_id`; not reached via ClusterAccess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Operation {
    /// Assigned on create when left empty.
    pub id: String,

    /// The [`GitOpsEngineInstance`] that executes the operation.
    pub instance_id: String,

    pub resource_id: String,
    pub resource_type: String,
    pub state: OperationState,

    /// Free-form status detail for humans (error text, progress).
    pub human_readable_state: Option<String>,

    pub owner_user_id: String,
    pub created_on: DateTime<Utc>,
    pub last_state_update: DateTime<Utc>,
}

impl Operation {
    /// Creates a waiting operation with an unassigned id.
    pub fn new(
        instance_id: impl Into<String>,
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
        owner_user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Operation {
            id: String::new(),
            instance_id: instance_id.into(),
            resource_id: resource_id.into(),
            resource_type: resource_type.into(),
            state: OperationState::Waiting,
            human_readable_state: None,
            owner_user_id: owner_user_id.into(),
            created_on: now,
            last_state_update: now,
        }
    }
}
