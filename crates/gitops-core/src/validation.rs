//! # Validation Module
//!
//! Key and field checks that run before any store round trip.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Empty keys (any component of a composite key)                     │
//! │  └── Oversized keys and names                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Query engine (gitops-db)                                     │
//! │  └── Authorization predicate inside the SQL statement                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── PRIMARY KEY / composite key uniqueness                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use gitops_core::validation::validate_id;
//!
//! assert!(validate_id("application_id", "app-1").is_ok());
//! assert!(validate_id("application_id", "").is_err());
//! ```
//!
//! Opaque payloads (`Application::spec_field`, `ApplicationState::state`) are
//! never inspected here.

use crate::error::ValidationError;
use crate::types::*;
use crate::{MAX_ID_LEN, MAX_NAME_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates an identifier: non-empty and at most [`MAX_ID_LEN`] characters.
///
/// Identifiers are opaque; surrounding whitespace is NOT trimmed, a key of
/// `"  "` is a legal (if odd) key.
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.chars().count() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a display or namespace name (may be empty, bounded length).
pub fn validate_name(field: &str, value: &str) -> ValidationResult<()> {
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Record-level validation.
///
/// Checks the primary key (every component, for composite keys) and the
/// foreign keys the ownership chain depends on.
pub trait Validate {
    fn validate(&self) -> ValidationResult<()>;
}

impl Validate for ClusterUser {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("clusteruser_id", &self.id)?;
        validate_name("user_name", &self.user_name)
    }
}

impl Validate for ClusterCredentials {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("clustercredentials_id", &self.id)?;
        validate_name("serviceaccount_ns", &self.serviceaccount_ns)
    }
}

impl Validate for GitOpsEngineCluster {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("gitopsenginecluster_id", &self.id)?;
        validate_id("clustercredentials_id", &self.clustercredentials_id)
    }
}

impl Validate for GitOpsEngineInstance {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("gitopsengineinstance_id", &self.id)?;
        validate_name("namespace_name", &self.namespace_name)?;
        validate_id("enginecluster_id", &self.enginecluster_id)
    }
}

impl Validate for ManagedEnvironment {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("managedenvironment_id", &self.id)?;
        validate_name("name", &self.name)?;
        validate_id("clustercredentials_id", &self.clustercredentials_id)
    }
}

impl Validate for ClusterAccess {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("user_id", &self.user_id)?;
        validate_id("managed_environment_id", &self.managed_environment_id)?;
        validate_id("gitops_engine_instance_id", &self.gitops_engine_instance_id)
    }
}

impl Validate for Application {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("application_id", &self.id)?;
        validate_name("name", &self.name)?;
        validate_id("engine_instance_id", &self.engine_instance_id)?;
        validate_id("managed_environment_id", &self.managed_environment_id)
    }
}

impl Validate for ApplicationState {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("application_id", &self.application_id)
    }
}

impl Validate for DeploymentToApplicationMapping {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("deploymenttoapplicationmapping_id", &self.id)?;
        validate_id("application_id", &self.application_id)
    }
}

impl Validate for Operation {
    fn validate(&self) -> ValidationResult<()> {
        validate_id("operation_id", &self.id)?;
        validate_id("instance_id", &self.instance_id)?;
        validate_id("resource_id", &self.resource_id)?;
        validate_name("resource_type", &self.resource_type)?;
        validate_id("owner_user_id", &self.owner_user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("id", "test-user").is_ok());
        assert!(validate_id("id", &"a".repeat(MAX_ID_LEN)).is_ok());

        assert_eq!(
            validate_id("id", "").unwrap_err(),
            ValidationError::required("id")
        );
        assert!(matches!(
            validate_id("id", &"a".repeat(MAX_ID_LEN + 1)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_validate_name_allows_empty() {
        assert!(validate_name("name", "").is_ok());
        assert!(validate_name("name", &"n".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_composite_key_requires_every_component() {
        let full = ClusterAccess {
            user_id: "u1".to_string(),
            managed_environment_id: "env1".to_string(),
            gitops_engine_instance_id: "i1".to_string(),
        };
        assert!(full.validate().is_ok());

        let mut missing_user = full.clone();
        missing_user.user_id.clear();
        assert_eq!(missing_user.validate().unwrap_err().field(), "user_id");

        let mut missing_env = full.clone();
        missing_env.managed_environment_id.clear();
        assert_eq!(
            missing_env.validate().unwrap_err().field(),
            "managed_environment_id"
        );

        let mut missing_instance = full;
        missing_instance.gitops_engine_instance_id.clear();
        assert_eq!(
            missing_instance.validate().unwrap_err().field(),
            "gitops_engine_instance_id"
        );
    }

    #[test]
    fn test_application_payload_is_not_inspected() {
        let app = Application {
            id: "app1".to_string(),
            name: "app".to_string(),
            spec_field: "not even json {".to_string(),
            engine_instance_id: "i1".to_string(),
            managed_environment_id: "env1".to_string(),
        };
        assert!(app.validate().is_ok());
    }

    #[test]
    fn test_operation_requires_owner() {
        let mut op = Operation::new("i1", "r1", "GitopsEngineInstance", "");
        op.id = "op1".to_string();
        assert_eq!(op.validate().unwrap_err().field(), "owner_user_id");
    }
}
