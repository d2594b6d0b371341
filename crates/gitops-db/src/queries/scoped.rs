//! # Scoped Query Engine
//!
//! Ownership-checked reads and writes made on behalf of one user.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Scoped Call                                          │
//! │                                                                         │
//! │  scoped.get_application_by_id(&ctx, "app1", "u1")                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate key + caller ──► InvalidArgument (no round trip)              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  one statement: key AND ownership predicate                             │
//! │       │                                                                 │
//! │       ├── row      ──► Ok(Application)                                  │
//! │       └── no row   ──► NotFound (absent and "not yours" look the same)  │
//! │                                                                         │
//! │  Deletes never fail for "not yours": they report 0 rows.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no bulk listing here. Listing belongs to [`super::UnsafeQueries`].

use chrono::Utc;
use gitops_core::validation::{validate_id, Validate};
use gitops_core::{
    Application, ApplicationState, ClusterAccess, ClusterCredentials, ClusterUser,
    DeploymentToApplicationMapping, GitOpsEngineCluster, GitOpsEngineInstance,
    ManagedEnvironment, Operation,
};
use sqlx::SqlitePool;
use tracing::debug;

use super::ownership::{
    delete_owned, fetch_owned, missing_grant, owned_delete_sql, validate_scoped_key,
    ScopedEntity, APPLICATION_CHAIN, CALLER_FIELD,
};
use super::table::{
    delete_application_children, insert_row, prepare_operation, update_operation_row,
};
use crate::context::QueryContext;
use crate::error::{DbError, DbResult};

/// Query engine that applies the caller's authorization predicate to every
/// statement.
///
/// ## Usage
/// ```rust,ignore
/// let scoped = db.scoped();
///
/// let app = scoped.get_application_by_id(&ctx, "app1", caller).await?;
/// let removed = scoped.delete_application_by_id(&ctx, "app1", caller).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ScopedQueries {
    pool: SqlitePool,
}

impl ScopedQueries {
    /// Creates a scoped engine over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        ScopedQueries { pool }
    }

    async fn get<T: ScopedEntity>(&self, ctx: &QueryContext, id: &str, caller: &str) -> DbResult<T> {
        debug!(entity = T::ENTITY, id = %id, caller = %caller, "Scoped get");
        fetch_owned(&self.pool, ctx, id, caller).await
    }

    async fn delete<T: ScopedEntity>(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<u64> {
        let deleted = delete_owned::<T>(&self.pool, ctx, id, caller).await?;
        debug!(entity = T::ENTITY, id = %id, caller = %caller, deleted, "Scoped delete");
        Ok(deleted)
    }

    // =========================================================================
    // ClusterUser
    // =========================================================================

    /// Returns the caller's own user record. Any other id is NotFound.
    pub async fn get_cluster_user_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<ClusterUser> {
        self.get(ctx, id, caller).await
    }

    // =========================================================================
    // ClusterCredentials / GitOpsEngineCluster
    // =========================================================================

    /// Credentials are visible through a granted environment or through the
    /// engine cluster behind a granted instance.
    pub async fn get_cluster_credentials_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<ClusterCredentials> {
        self.get(ctx, id, caller).await
    }

    /// Visible when one of its instances is granted to the caller. NotFound
    /// otherwise, same as absent.
    pub async fn get_gitops_engine_cluster_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<GitOpsEngineCluster> {
        self.get(ctx, id, caller).await
    }

    // =========================================================================
    // ManagedEnvironment
    // =========================================================================

    /// Inserts an environment the caller already holds a ClusterAccess row
    /// for. Fails with NotFound when no such grant exists.
    pub async fn create_managed_environment(
        &self,
        ctx: &QueryContext,
        environment: &ManagedEnvironment,
        caller: &str,
    ) -> DbResult<()> {
        environment.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        debug!(id = %environment.id, caller = %caller, "Creating managed environment");

        let result = ctx
            .run(
                sqlx::query(
                    r#"
                    INSERT INTO managedenvironment (id, name, clustercredentials_id)
                    SELECT ?1, ?3, ?4
                    WHERE EXISTS (
                        SELECT 1 FROM clusteraccess ca
                        WHERE ca.managed_environment_id = ?1 AND ca.user_id = ?2
                    )
                    "#,
                )
                .bind(&environment.id)
                .bind(caller)
                .bind(&environment.name)
                .bind(&environment.clustercredentials_id)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(missing_grant(caller, Some(&environment.id), None));
        }
        Ok(())
    }

    /// Fetches an environment the caller has a grant on. NotFound when absent
    /// or not granted.
    pub async fn get_managed_environment_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<ManagedEnvironment> {
        self.get(ctx, id, caller).await
    }

    /// Deletes a granted environment. Returns rows removed; 0 when absent or
    /// not the caller's.
    pub async fn delete_managed_environment_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<u64> {
        self.delete::<ManagedEnvironment>(ctx, id, caller).await
    }

    // =========================================================================
    // GitOpsEngineInstance
    // =========================================================================

    /// Inserts an engine instance the caller already holds a ClusterAccess
    /// row for. Fails with NotFound when no such grant exists.
    pub async fn create_gitops_engine_instance(
        &self,
        ctx: &QueryContext,
        instance: &GitOpsEngineInstance,
        caller: &str,
    ) -> DbResult<()> {
        instance.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        debug!(id = %instance.id, caller = %caller, "Creating engine instance");

        let result = ctx
            .run(
                sqlx::query(
                    r#"
                    INSERT INTO gitopsengineinstance (
                        id, namespace_name, namespace_uid, enginecluster_id
                    )
                    SELECT ?1, ?3, ?4, ?5
                    WHERE EXISTS (
                        SELECT 1 FROM clusteraccess ca
                        WHERE ca.gitops_engine_instance_id = ?1 AND ca.user_id = ?2
                    )
                    "#,
                )
                .bind(&instance.id)
                .bind(caller)
                .bind(&instance.namespace_name)
                .bind(&instance.namespace_uid)
                .bind(&instance.enginecluster_id)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(missing_grant(caller, None, Some(&instance.id)));
        }
        Ok(())
    }

    /// Fetches a granted engine instance. NotFound when absent or not granted.
    pub async fn get_gitops_engine_instance_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<GitOpsEngineInstance> {
        self.get(ctx, id, caller).await
    }

    /// Deletes a granted engine instance. 0 rows when absent or not granted.
    pub async fn delete_gitops_engine_instance_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<u64> {
        self.delete::<GitOpsEngineInstance>(ctx, id, caller).await
    }

    // =========================================================================
    // ClusterAccess
    // =========================================================================

    // Grants are minted by the privileged engine only; a user may read or
    // give up their own.

    /// Looks up one of the caller's own grants by its full composite key.
    pub async fn get_cluster_access(
        &self,
        ctx: &QueryContext,
        access: &ClusterAccess,
        caller: &str,
    ) -> DbResult<ClusterAccess> {
        access.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        debug!(
            user = %access.user_id,
            environment = %access.managed_environment_id,
            instance = %access.gitops_engine_instance_id,
            caller = %caller,
            "Scoped get cluster access"
        );

        let row = ctx
            .run(
                sqlx::query_as::<_, ClusterAccess>(
                    r#"
                    SELECT * FROM clusteraccess
                    WHERE user_id = ?1
                      AND managed_environment_id = ?3
                      AND gitops_engine_instance_id = ?4
                      AND user_id = ?2
                    "#,
                )
                .bind(&access.user_id)
                .bind(caller)
                .bind(&access.managed_environment_id)
                .bind(&access.gitops_engine_instance_id)
                .fetch_optional(&self.pool),
            )
            .await?;

        row.ok_or_else(|| DbError::not_found("ClusterAccess", access_key(access)))
    }

    /// Removes one of the caller's own grants. Someone else's grant is 0.
    pub async fn delete_cluster_access(
        &self,
        ctx: &QueryContext,
        access: &ClusterAccess,
        caller: &str,
    ) -> DbResult<u64> {
        access.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        let result = ctx
            .run(
                sqlx::query(
                    r#"
                    DELETE FROM clusteraccess
                    WHERE user_id = ?1
                      AND managed_environment_id = ?3
                      AND gitops_engine_instance_id = ?4
                      AND user_id = ?2
                    "#,
                )
                .bind(&access.user_id)
                .bind(caller)
                .bind(&access.managed_environment_id)
                .bind(&access.gitops_engine_instance_id)
                .execute(&self.pool),
            )
            .await?;

        let deleted = result.rows_affected();
        debug!(key = %access_key(access), caller = %caller, deleted, "Scoped delete cluster access");
        Ok(deleted)
    }

    // =========================================================================
    // Application
    // =========================================================================

    /// Inserts an application whose (environment, instance) pair the caller
    /// is granted. Fails with NotFound when the grant is missing.
    pub async fn create_application(
        &self,
        ctx: &QueryContext,
        application: &Application,
        caller: &str,
    ) -> DbResult<()> {
        application.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        debug!(id = %application.id, caller = %caller, "Creating application");

        let result = ctx
            .run(
                sqlx::query(
                    r#"
                    INSERT INTO application (
                        id, name, spec_field, engine_instance_id, managed_environment_id
                    )
                    SELECT ?1, ?3, ?4, ?5, ?6
                    WHERE EXISTS (
                        SELECT 1 FROM clusteraccess ca
                        WHERE ca.gitops_engine_instance_id = ?5
                          AND ca.managed_environment_id = ?6
                          AND ca.user_id = ?2
                    )
                    "#,
                )
                .bind(&application.id)
                .bind(caller)
                .bind(&application.name)
                .bind(&application.spec_field)
                .bind(&application.engine_instance_id)
                .bind(&application.managed_environment_id)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(missing_grant(
                caller,
                Some(&application.managed_environment_id),
                Some(&application.engine_instance_id),
            ));
        }
        Ok(())
    }

    /// Fetches an application whose (environment, instance) pair the caller
    /// is granted. NotFound when absent or not granted.
    pub async fn get_application_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<Application> {
        self.get(ctx, id, caller).await
    }

    /// Whole-row replace of an application.
    ///
    /// The caller must own the row as stored and must also be granted the
    /// (environment, instance) pair the new row points at. Either check
    /// failing reads as NotFound.
    pub async fn update_application(
        &self,
        ctx: &QueryContext,
        application: &Application,
        caller: &str,
    ) -> DbResult<()> {
        application.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        let sql = format!(
            r#"
            UPDATE application SET
                name = ?3,
                spec_field = ?4,
                engine_instance_id = ?5,
                managed_environment_id = ?6
            WHERE application.id = ?1
              AND {owned}
              AND EXISTS (
                  SELECT 1 FROM clusteraccess grant_ca
                  WHERE grant_ca.gitops_engine_instance_id = ?5
                    AND grant_ca.managed_environment_id = ?6
                    AND grant_ca.user_id = ?2
              )
            "#,
            owned = APPLICATION_CHAIN.replace("{t}", "application"),
        );

        let result = ctx
            .run(
                sqlx::query(&sql)
                    .bind(&application.id)
                    .bind(caller)
                    .bind(&application.name)
                    .bind(&application.spec_field)
                    .bind(&application.engine_instance_id)
                    .bind(&application.managed_environment_id)
                    .execute(&self.pool),
            )
            .await?;

        debug!(id = %application.id, caller = %caller, "Scoped update application");

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Application", &application.id));
        }
        Ok(())
    }

    /// Deletes an application the caller owns, together with its state and
    /// deployment mappings, in one transaction.
    pub async fn delete_application_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<u64> {
        validate_scoped_key::<Application>(id, caller)?;

        let sql = owned_delete_sql::<Application>();
        let pool = &self.pool;

        let deleted = ctx
            .run(async {
                let mut tx = pool.begin().await?;

                let result = sqlx::query(&sql)
                    .bind(id)
                    .bind(caller)
                    .execute(&mut *tx)
                    .await?;

                if result.rows_affected() > 0 {
                    delete_application_children(&mut *tx, id).await?;
                }

                tx.commit().await?;
                Ok::<_, DbError>(result.rows_affected())
            })
            .await?;

        debug!(id = %id, caller = %caller, deleted, "Scoped delete application");
        Ok(deleted)
    }

    // =========================================================================
    // ApplicationState
    // =========================================================================

    /// Reached through the owning application. NotFound when the application
    /// has no state or is not the caller's.
    pub async fn get_application_state_by_id(
        &self,
        ctx: &QueryContext,
        application_id: &str,
        caller: &str,
    ) -> DbResult<ApplicationState> {
        self.get(ctx, application_id, caller).await
    }

    // =========================================================================
    // Operation
    // =========================================================================

    /// Inserts an operation owned by the caller and returns the stored row.
    ///
    /// An empty id is replaced by a fresh UUID; both timestamps are set to
    /// now. Naming anyone but the caller as owner fails with Forbidden
    /// before the store is touched.
    pub async fn create_operation(
        &self,
        ctx: &QueryContext,
        operation: &Operation,
        caller: &str,
    ) -> DbResult<Operation> {
        validate_id(CALLER_FIELD, caller)?;
        let mut operation = prepare_operation(operation)?;

        if operation.owner_user_id != caller {
            return Err(DbError::forbidden(format!(
                "operation owner '{}' does not match caller '{}'",
                operation.owner_user_id, caller
            )));
        }

        let now = Utc::now();
        operation.created_on = now;
        operation.last_state_update = now;

        debug!(id = %operation.id, caller = %caller, state = %operation.state, "Creating operation");

        insert_row(&self.pool, ctx, &operation).await?;
        Ok(operation)
    }

    /// Fetches one of the caller's operations. Someone else's is NotFound.
    pub async fn get_operation_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<Operation> {
        self.get(ctx, id, caller).await
    }

    /// Whole-row replace of one of the caller's operations.
    ///
    /// Ownership cannot be handed over: the new row must name the caller
    /// (Forbidden otherwise) and the stored row must already be theirs
    /// (NotFound otherwise).
    pub async fn update_operation(
        &self,
        ctx: &QueryContext,
        operation: &Operation,
        caller: &str,
    ) -> DbResult<()> {
        operation.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        if operation.owner_user_id != caller {
            return Err(DbError::forbidden(format!(
                "operation owner '{}' does not match caller '{}'",
                operation.owner_user_id, caller
            )));
        }

        let updated = update_operation_row(&self.pool, ctx, operation, Some(caller)).await?;

        debug!(id = %operation.id, caller = %caller, state = %operation.state, "Scoped update operation");

        if updated == 0 {
            return Err(DbError::not_found("Operation", &operation.id));
        }
        Ok(())
    }

    /// Deletes one of the caller's operations. 0 when absent or not theirs.
    pub async fn delete_operation_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<u64> {
        self.delete::<Operation>(ctx, id, caller).await
    }

    // =========================================================================
    // DeploymentToApplicationMapping
    // =========================================================================

    /// Inserts a mapping to an application the caller owns. Fails with
    /// NotFound (for the application) otherwise.
    pub async fn create_deployment_to_application_mapping(
        &self,
        ctx: &QueryContext,
        mapping: &DeploymentToApplicationMapping,
        caller: &str,
    ) -> DbResult<()> {
        mapping.validate()?;
        validate_id(CALLER_FIELD, caller)?;

        let result = ctx
            .run(
                sqlx::query(
                    r#"
                    INSERT INTO deploymenttoapplicationmapping (id, application_id)
                    SELECT ?1, ?3
                    WHERE EXISTS (
                        SELECT 1 FROM application a
                        JOIN clusteraccess ca
                          ON ca.managed_environment_id = a.managed_environment_id
                         AND ca.gitops_engine_instance_id = a.engine_instance_id
                        WHERE a.id = ?3 AND ca.user_id = ?2
                    )
                    "#,
                )
                .bind(&mapping.id)
                .bind(caller)
                .bind(&mapping.application_id)
                .execute(&self.pool),
            )
            .await?;

        debug!(id = %mapping.id, application = %mapping.application_id, caller = %caller, "Creating deployment mapping");

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Application", &mapping.application_id));
        }
        Ok(())
    }

    /// Reached through the mapped application. NotFound when absent or not
    /// granted.
    pub async fn get_deployment_to_application_mapping_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<DeploymentToApplicationMapping> {
        self.get(ctx, id, caller).await
    }

    /// Deletes a mapping whose application the caller is granted. 0 rows
    /// otherwise.
    pub async fn delete_deployment_to_application_mapping_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
        caller: &str,
    ) -> DbResult<u64> {
        self.delete::<DeploymentToApplicationMapping>(ctx, id, caller)
            .await
    }
}

/// "user/environment/instance", used in errors and logs.
pub(crate) fn access_key(access: &ClusterAccess) -> String {
    format!(
        "{}/{}/{}",
        access.user_id, access.managed_environment_id, access.gitops_engine_instance_id
    )
}
