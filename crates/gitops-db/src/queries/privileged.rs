//! # Privileged Query Engine
//!
//! Unchecked CRUD for reconcilers, fixtures and tooling. No caller identity,
//! no ownership predicate.
//!
//! ## The Double Gate
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Privileged Call                                      │
//! │                                                                         │
//! │  db.unsafe_queries(allow_unsafe)   ← gate 1: construction-time flag     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  admin.list_all_applications(&ctx)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  guard("list_all_applications")    ← gate 2: checked on every call      │
//! │       │                                                                 │
//! │       ├── flag false ──► PermissionDenied (before validation)           │
//! │       └── flag true  ──► plain statement, no WHERE on the caller        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The flag cannot be changed after construction and is not part of
//! [`crate::DbConfig`].

use gitops_core::validation::{validate_id, Validate};
use gitops_core::{
    Application, ApplicationState, ClusterAccess, ClusterCredentials, ClusterUser,
    DeploymentToApplicationMapping, GitOpsEngineCluster, GitOpsEngineInstance,
    ManagedEnvironment, Operation,
};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::scoped::access_key;
use super::table::{
    delete_application_children, delete_by_key, fetch_by_key, insert_row, list_all,
    prepare_operation, update_operation_row,
};
use crate::context::QueryContext;
use crate::error::{DbError, DbResult};

/// Query engine that bypasses ownership checks.
///
/// ## Usage
/// ```rust,ignore
/// // Reconciler startup
/// let admin = db.unsafe_queries(true);
/// for instance in admin.list_all_gitops_engine_instances(&ctx).await? {
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct UnsafeQueries {
    pool: SqlitePool,
    allow_unsafe: bool,
}

impl UnsafeQueries {
    /// Creates a privileged engine. With `allow_unsafe == false` every method
    /// fails with `ErrorKind::PermissionDenied`.
    pub fn new(pool: SqlitePool, allow_unsafe: bool) -> Self {
        UnsafeQueries { pool, allow_unsafe }
    }

    /// Whether this engine was built with the unsafe opt-in.
    pub fn allows_unsafe(&self) -> bool {
        self.allow_unsafe
    }

    fn guard(&self, operation: &'static str) -> DbResult<()> {
        if self.allow_unsafe {
            debug!(operation, "Privileged query");
            return Ok(());
        }
        warn!(operation, "Refusing privileged query: engine built without unsafe opt-in");
        Err(DbError::UnsafeNotAllowed { operation })
    }

    // =========================================================================
    // ClusterUser
    // =========================================================================

    /// Inserts a user. An existing id is `ErrorKind::Conflict`.
    pub async fn create_cluster_user(&self, ctx: &QueryContext, user: &ClusterUser) -> DbResult<()> {
        self.guard("create_cluster_user")?;
        insert_row(&self.pool, ctx, user).await
    }

    /// Fetches a user by id. NotFound when no row has it.
    pub async fn get_cluster_user_by_id(&self, ctx: &QueryContext, id: &str) -> DbResult<ClusterUser> {
        self.guard("get_cluster_user_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every user in the store.
    pub async fn list_all_cluster_users(&self, ctx: &QueryContext) -> DbResult<Vec<ClusterUser>> {
        self.guard("list_all_cluster_users")?;
        list_all(&self.pool, ctx).await
    }

    /// Deletes a user by id. Returns rows removed, 0 when absent.
    pub async fn delete_cluster_user_by_id(&self, ctx: &QueryContext, id: &str) -> DbResult<u64> {
        self.guard("delete_cluster_user_by_id")?;
        delete_by_key::<ClusterUser>(&self.pool, ctx, id).await
    }

    // =========================================================================
    // ClusterCredentials
    // =========================================================================

    /// Inserts a credentials row. An existing id is `ErrorKind::Conflict`.
    pub async fn create_cluster_credentials(
        &self,
        ctx: &QueryContext,
        credentials: &ClusterCredentials,
    ) -> DbResult<()> {
        self.guard("create_cluster_credentials")?;
        insert_row(&self.pool, ctx, credentials).await
    }

    /// Fetches credentials by id. NotFound when absent.
    pub async fn get_cluster_credentials_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<ClusterCredentials> {
        self.guard("get_cluster_credentials_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every credentials row, secrets included.
    pub async fn list_all_cluster_credentials(
        &self,
        ctx: &QueryContext,
    ) -> DbResult<Vec<ClusterCredentials>> {
        self.guard("list_all_cluster_credentials")?;
        list_all(&self.pool, ctx).await
    }

    /// Deletes credentials by id. 0 when absent; referencing rows are left alone.
    pub async fn delete_cluster_credentials_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<u64> {
        self.guard("delete_cluster_credentials_by_id")?;
        delete_by_key::<ClusterCredentials>(&self.pool, ctx, id).await
    }

    // =========================================================================
    // GitOpsEngineCluster
    // =========================================================================

    /// Inserts an engine cluster.
    pub async fn create_gitops_engine_cluster(
        &self,
        ctx: &QueryContext,
        cluster: &GitOpsEngineCluster,
    ) -> DbResult<()> {
        self.guard("create_gitops_engine_cluster")?;
        insert_row(&self.pool, ctx, cluster).await
    }

    /// Fetches an engine cluster by id. NotFound when absent.
    pub async fn get_gitops_engine_cluster_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<GitOpsEngineCluster> {
        self.guard("get_gitops_engine_cluster_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every engine cluster.
    pub async fn list_all_gitops_engine_clusters(
        &self,
        ctx: &QueryContext,
    ) -> DbResult<Vec<GitOpsEngineCluster>> {
        self.guard("list_all_gitops_engine_clusters")?;
        list_all(&self.pool, ctx).await
    }

    /// Deletes an engine cluster by id. Returns rows removed, 0 when absent.
    pub async fn delete_gitops_engine_cluster_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<u64> {
        self.guard("delete_gitops_engine_cluster_by_id")?;
        delete_by_key::<GitOpsEngineCluster>(&self.pool, ctx, id).await
    }

    // =========================================================================
    // GitOpsEngineInstance
    // =========================================================================

    /// Inserts an engine instance.
    pub async fn create_gitops_engine_instance(
        &self,
        ctx: &QueryContext,
        instance: &GitOpsEngineInstance,
    ) -> DbResult<()> {
        self.guard("create_gitops_engine_instance")?;
        insert_row(&self.pool, ctx, instance).await
    }

    /// Fetches an engine instance by id. NotFound when absent.
    pub async fn get_gitops_engine_instance_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<GitOpsEngineInstance> {
        self.guard("get_gitops_engine_instance_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every engine instance. Reconcilers iterate this on startup.
    pub async fn list_all_gitops_engine_instances(
        &self,
        ctx: &QueryContext,
    ) -> DbResult<Vec<GitOpsEngineInstance>> {
        self.guard("list_all_gitops_engine_instances")?;
        list_all(&self.pool, ctx).await
    }

    /// Deletes an engine instance by id. Returns rows removed, 0 when absent.
    pub async fn delete_gitops_engine_instance_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<u64> {
        self.guard("delete_gitops_engine_instance_by_id")?;
        delete_by_key::<GitOpsEngineInstance>(&self.pool, ctx, id).await
    }

    // =========================================================================
    // ManagedEnvironment
    // =========================================================================

    /// Inserts a managed environment.
    pub async fn create_managed_environment(
        &self,
        ctx: &QueryContext,
        environment: &ManagedEnvironment,
    ) -> DbResult<()> {
        self.guard("create_managed_environment")?;
        insert_row(&self.pool, ctx, environment).await
    }

    /// Fetches a managed environment by id. NotFound when absent.
    pub async fn get_managed_environment_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<ManagedEnvironment> {
        self.guard("get_managed_environment_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every managed environment.
    pub async fn list_all_managed_environments(
        &self,
        ctx: &QueryContext,
    ) -> DbResult<Vec<ManagedEnvironment>> {
        self.guard("list_all_managed_environments")?;
        list_all(&self.pool, ctx).await
    }

    /// Deletes a managed environment by id. Returns rows removed, 0 when absent.
    pub async fn delete_managed_environment_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<u64> {
        self.guard("delete_managed_environment_by_id")?;
        delete_by_key::<ManagedEnvironment>(&self.pool, ctx, id).await
    }

    // =========================================================================
    // ClusterAccess
    // =========================================================================

    /// Grants a user an (environment, instance) pair.
    ///
    /// A grant that already exists is rejected with `ErrorKind::Conflict`.
    pub async fn create_cluster_access(
        &self,
        ctx: &QueryContext,
        access: &ClusterAccess,
    ) -> DbResult<()> {
        self.guard("create_cluster_access")?;
        insert_row(&self.pool, ctx, access).await?;
        debug!(key = %access_key(access), "Cluster access granted");
        Ok(())
    }

    /// Looks up a grant by its full triple. NotFound when it does not exist.
    pub async fn get_cluster_access(
        &self,
        ctx: &QueryContext,
        access: &ClusterAccess,
    ) -> DbResult<ClusterAccess> {
        self.guard("get_cluster_access")?;
        access.validate()?;

        let row = ctx
            .run(
                sqlx::query_as::<_, ClusterAccess>(
                    r#"
                    SELECT * FROM clusteraccess
                    WHERE user_id = ?1
                      AND managed_environment_id = ?2
                      AND gitops_engine_instance_id = ?3
                    "#,
                )
                .bind(&access.user_id)
                .bind(&access.managed_environment_id)
                .bind(&access.gitops_engine_instance_id)
                .fetch_optional(&self.pool),
            )
            .await?;

        row.ok_or_else(|| DbError::not_found("ClusterAccess", access_key(access)))
    }

    /// Every grant, for every user.
    pub async fn list_all_cluster_access(&self, ctx: &QueryContext) -> DbResult<Vec<ClusterAccess>> {
        self.guard("list_all_cluster_access")?;
        list_all(&self.pool, ctx).await
    }

    /// Revokes a grant. Returns rows removed, 0 when it did not exist.
    pub async fn delete_cluster_access(
        &self,
        ctx: &QueryContext,
        access: &ClusterAccess,
    ) -> DbResult<u64> {
        self.guard("delete_cluster_access")?;
        access.validate()?;

        let result = ctx
            .run(
                sqlx::query(
                    r#"
                    DELETE FROM clusteraccess
                    WHERE user_id = ?1
                      AND managed_environment_id = ?2
                      AND gitops_engine_instance_id = ?3
                    "#,
                )
                .bind(&access.user_id)
                .bind(&access.managed_environment_id)
                .bind(&access.gitops_engine_instance_id)
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Application
    // =========================================================================

    /// Inserts an application. Its engine instance and environment are not checked.
    pub async fn create_application(
        &self,
        ctx: &QueryContext,
        application: &Application,
    ) -> DbResult<()> {
        self.guard("create_application")?;
        insert_row(&self.pool, ctx, application).await
    }

    /// Fetches an application by id. NotFound when absent.
    pub async fn get_application_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<Application> {
        self.guard("get_application_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every application.
    pub async fn list_all_applications(&self, ctx: &QueryContext) -> DbResult<Vec<Application>> {
        self.guard("list_all_applications")?;
        list_all(&self.pool, ctx).await
    }

    /// Whole-row replace. NotFound when no application has this id.
    pub async fn update_application(
        &self,
        ctx: &QueryContext,
        application: &Application,
    ) -> DbResult<()> {
        self.guard("update_application")?;
        application.validate()?;

        let result = ctx
            .run(
                sqlx::query(
                    r#"
                    UPDATE application SET
                        name = ?2,
                        spec_field = ?3,
                        engine_instance_id = ?4,
                        managed_environment_id = ?5
                    WHERE id = ?1
                    "#,
                )
                .bind(&application.id)
                .bind(&application.name)
                .bind(&application.spec_field)
                .bind(&application.engine_instance_id)
                .bind(&application.managed_environment_id)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Application", &application.id));
        }
        Ok(())
    }

    /// Deletes an application with its state and deployment mappings in one
    /// transaction. Returns rows removed from `application`, 0 when absent.
    /// If any of the three deletes fails, none of them is kept.
    pub async fn delete_application_by_id(&self, ctx: &QueryContext, id: &str) -> DbResult<u64> {
        self.guard("delete_application_by_id")?;
        validate_id("application_id", id)?;

        let pool = &self.pool;

        ctx.run(async {
            let mut tx = pool.begin().await?;

            let result = sqlx::query("DELETE FROM application WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() > 0 {
                delete_application_children(&mut *tx, id).await?;
            }

            tx.commit().await?;
            Ok::<_, DbError>(result.rows_affected())
        })
        .await
    }

    // =========================================================================
    // ApplicationState
    // =========================================================================

    /// Inserts the state row for an application. One per application.
    pub async fn create_application_state(
        &self,
        ctx: &QueryContext,
        state: &ApplicationState,
    ) -> DbResult<()> {
        self.guard("create_application_state")?;
        insert_row(&self.pool, ctx, state).await
    }

    /// Fetches the state of an application. NotFound when it has none.
    pub async fn get_application_state_by_id(
        &self,
        ctx: &QueryContext,
        application_id: &str,
    ) -> DbResult<ApplicationState> {
        self.guard("get_application_state_by_id")?;
        fetch_by_key(&self.pool, ctx, application_id).await
    }

    /// Every application state.
    pub async fn list_all_application_states(
        &self,
        ctx: &QueryContext,
    ) -> DbResult<Vec<ApplicationState>> {
        self.guard("list_all_application_states")?;
        list_all(&self.pool, ctx).await
    }

    /// Replaces the state payload. NotFound when the application has none.
    pub async fn update_application_state(
        &self,
        ctx: &QueryContext,
        state: &ApplicationState,
    ) -> DbResult<()> {
        self.guard("update_application_state")?;
        state.validate()?;

        let result = ctx
            .run(
                sqlx::query("UPDATE applicationstate SET state = ?2 WHERE application_id = ?1")
                    .bind(&state.application_id)
                    .bind(&state.state)
                    .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ApplicationState", &state.application_id));
        }
        Ok(())
    }

    /// Deletes the state of an application. 0 when it had none.
    pub async fn delete_application_state_by_id(
        &self,
        ctx: &QueryContext,
        application_id: &str,
    ) -> DbResult<u64> {
        self.guard("delete_application_state_by_id")?;
        delete_by_key::<ApplicationState>(&self.pool, ctx, application_id).await
    }

    // =========================================================================
    // Operation
    // =========================================================================

    /// Inserts an operation as given, assigning an id when it is empty.
    /// Timestamps are kept.
    pub async fn create_operation(
        &self,
        ctx: &QueryContext,
        operation: &Operation,
    ) -> DbResult<Operation> {
        self.guard("create_operation")?;
        let operation = prepare_operation(operation)?;
        insert_row(&self.pool, ctx, &operation).await?;
        Ok(operation)
    }

    /// Fetches an operation by id. NotFound when absent.
    pub async fn get_operation_by_id(&self, ctx: &QueryContext, id: &str) -> DbResult<Operation> {
        self.guard("get_operation_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every operation, across owners.
    pub async fn list_all_operations(&self, ctx: &QueryContext) -> DbResult<Vec<Operation>> {
        self.guard("list_all_operations")?;
        list_all(&self.pool, ctx).await
    }

    /// Whole-row replace, owner included. NotFound when no row has this id.
    pub async fn update_operation(&self, ctx: &QueryContext, operation: &Operation) -> DbResult<()> {
        self.guard("update_operation")?;
        operation.validate()?;

        if update_operation_row(&self.pool, ctx, operation, None).await? == 0 {
            return Err(DbError::not_found("Operation", &operation.id));
        }
        Ok(())
    }

    /// Deletes an operation by id. Returns rows removed, 0 when absent.
    pub async fn delete_operation_by_id(&self, ctx: &QueryContext, id: &str) -> DbResult<u64> {
        self.guard("delete_operation_by_id")?;
        delete_by_key::<Operation>(&self.pool, ctx, id).await
    }

    // =========================================================================
    // DeploymentToApplicationMapping
    // =========================================================================

    /// Inserts a deployment mapping.
    pub async fn create_deployment_to_application_mapping(
        &self,
        ctx: &QueryContext,
        mapping: &DeploymentToApplicationMapping,
    ) -> DbResult<()> {
        self.guard("create_deployment_to_application_mapping")?;
        insert_row(&self.pool, ctx, mapping).await
    }

    /// Fetches a deployment mapping by id. NotFound when absent.
    pub async fn get_deployment_to_application_mapping_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<DeploymentToApplicationMapping> {
        self.guard("get_deployment_to_application_mapping_by_id")?;
        fetch_by_key(&self.pool, ctx, id).await
    }

    /// Every deployment mapping.
    pub async fn list_all_deployment_to_application_mappings(
        &self,
        ctx: &QueryContext,
    ) -> DbResult<Vec<DeploymentToApplicationMapping>> {
        self.guard("list_all_deployment_to_application_mappings")?;
        list_all(&self.pool, ctx).await
    }

    /// Deletes a deployment mapping by id. Returns rows removed, 0 when absent.
    pub async fn delete_deployment_to_application_mapping_by_id(
        &self,
        ctx: &QueryContext,
        id: &str,
    ) -> DbResult<u64> {
        self.guard("delete_deployment_to_application_mapping_by_id")?;
        delete_by_key::<DeploymentToApplicationMapping>(&self.pool, ctx, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;
    use crate::{Database, DbConfig, ErrorKind};

    #[tokio::test]
    async fn test_gate_precedes_validation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let data = fixtures::seed(&db).await;
        let denied = db.unsafe_queries(false);
        let ctx = QueryContext::background();

        assert!(!denied.allows_unsafe());

        // Creates reuse seeded rows (Conflict if the gate let them through);
        // keyed calls pass empty keys (InvalidArgument if it did).
        let blank_access = ClusterAccess {
            user_id: String::new(),
            managed_environment_id: String::new(),
            gitops_engine_instance_id: String::new(),
        };
        let blank_app = Application {
            id: String::new(),
            ..data.application.clone()
        };
        let blank_state = ApplicationState {
            application_id: String::new(),
            state: String::new(),
        };
        let blank_op = Operation::new("", "", "", "");
        let user = ClusterUser {
            id: "u1".to_string(),
            user_name: "alice".to_string(),
        };

        let results: Vec<(&str, DbResult<()>)> = vec![
            ("create_cluster_user", denied.create_cluster_user(&ctx, &user).await),
            ("get_cluster_user_by_id", denied.get_cluster_user_by_id(&ctx, "").await.map(|_| ())),
            ("list_all_cluster_users", denied.list_all_cluster_users(&ctx).await.map(|_| ())),
            ("delete_cluster_user_by_id", denied.delete_cluster_user_by_id(&ctx, "").await.map(|_| ())),
            (
                "create_cluster_credentials",
                denied.create_cluster_credentials(&ctx, &data.credentials).await,
            ),
            (
                "get_cluster_credentials_by_id",
                denied.get_cluster_credentials_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "list_all_cluster_credentials",
                denied.list_all_cluster_credentials(&ctx).await.map(|_| ()),
            ),
            (
                "delete_cluster_credentials_by_id",
                denied.delete_cluster_credentials_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "create_gitops_engine_cluster",
                denied.create_gitops_engine_cluster(&ctx, &data.engine_cluster).await,
            ),
            (
                "get_gitops_engine_cluster_by_id",
                denied.get_gitops_engine_cluster_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "list_all_gitops_engine_clusters",
                denied.list_all_gitops_engine_clusters(&ctx).await.map(|_| ()),
            ),
            (
                "delete_gitops_engine_cluster_by_id",
                denied.delete_gitops_engine_cluster_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "create_gitops_engine_instance",
                denied.create_gitops_engine_instance(&ctx, &data.instance).await,
            ),
            (
                "get_gitops_engine_instance_by_id",
                denied.get_gitops_engine_instance_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "list_all_gitops_engine_instances",
                denied.list_all_gitops_engine_instances(&ctx).await.map(|_| ()),
            ),
            (
                "delete_gitops_engine_instance_by_id",
                denied.delete_gitops_engine_instance_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "create_managed_environment",
                denied.create_managed_environment(&ctx, &data.environment).await,
            ),
            (
                "get_managed_environment_by_id",
                denied.get_managed_environment_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "list_all_managed_environments",
                denied.list_all_managed_environments(&ctx).await.map(|_| ()),
            ),
            (
                "delete_managed_environment_by_id",
                denied.delete_managed_environment_by_id(&ctx, "").await.map(|_| ()),
            ),
            ("create_cluster_access", denied.create_cluster_access(&ctx, &data.access).await),
            (
                "get_cluster_access",
                denied.get_cluster_access(&ctx, &blank_access).await.map(|_| ()),
            ),
            ("list_all_cluster_access", denied.list_all_cluster_access(&ctx).await.map(|_| ())),
            (
                "delete_cluster_access",
                denied.delete_cluster_access(&ctx, &blank_access).await.map(|_| ()),
            ),
            ("create_application", denied.create_application(&ctx, &data.application).await),
            ("get_application_by_id", denied.get_application_by_id(&ctx, "").await.map(|_| ())),
            ("list_all_applications", denied.list_all_applications(&ctx).await.map(|_| ())),
            ("update_application", denied.update_application(&ctx, &blank_app).await),
            (
                "delete_application_by_id",
                denied.delete_application_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "create_application_state",
                denied.create_application_state(&ctx, &data.application_state).await,
            ),
            (
                "get_application_state_by_id",
                denied.get_application_state_by_id(&ctx, "").await.map(|_| ()),
            ),
            (
                "list_all_application_states",
                denied.list_all_application_states(&ctx).await.map(|_| ()),
            ),
            (
                "update_application_state",
                denied.update_application_state(&ctx, &blank_state).await,
            ),
            (
                "delete_application_state_by_id",
                denied.delete_application_state_by_id(&ctx, "").await.map(|_| ()),
            ),
            ("create_operation", denied.create_operation(&ctx, &blank_op).await.map(|_| ())),
            ("get_operation_by_id", denied.get_operation_by_id(&ctx, "").await.map(|_| ())),
            ("list_all_operations", denied.list_all_operations(&ctx).await.map(|_| ())),
            ("update_operation", denied.update_operation(&ctx, &blank_op).await),
            ("delete_operation_by_id", denied.delete_operation_by_id(&ctx, "").await.map(|_| ())),
            (
                "create_deployment_to_application_mapping",
                denied
                    .create_deployment_to_application_mapping(&ctx, &data.mapping)
                    .await,
            ),
            (
                "get_deployment_to_application_mapping_by_id",
                denied
                    .get_deployment_to_application_mapping_by_id(&ctx, "")
                    .await
                    .map(|_| ()),
            ),
            (
                "list_all_deployment_to_application_mappings",
                denied
                    .list_all_deployment_to_application_mappings(&ctx)
                    .await
                    .map(|_| ()),
            ),
            (
                "delete_deployment_to_application_mapping_by_id",
                denied
                    .delete_deployment_to_application_mapping_by_id(&ctx, "")
                    .await
                    .map(|_| ()),
            ),
        ];

        assert_eq!(results.len(), 43);
        for (operation, result) in results {
            match result {
                Err(DbError::UnsafeNotAllowed { operation: refused }) => {
                    assert_eq!(refused, operation)
                }
                other => panic!("{operation}: expected PermissionDenied, got {other:?}"),
            }
        }

        // Nothing was written or removed.
        let admin = db.unsafe_queries(true);
        assert_eq!(admin.list_all_cluster_users(&ctx).await.unwrap().len(), 2);
        assert_eq!(admin.list_all_cluster_access(&ctx).await.unwrap(), vec![data.access]);
        assert_eq!(
            admin.list_all_applications(&ctx).await.unwrap(),
            vec![data.application]
        );
        assert!(admin.list_all_operations(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_all_returns_every_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let data = fixtures::seed(&db).await;
        let admin = db.unsafe_queries(true);
        let ctx = QueryContext::background();

        let mut users: Vec<String> = admin
            .list_all_cluster_users(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|user| user.id)
            .collect();
        users.sort();
        assert_eq!(users, vec!["u1".to_string(), "u2".to_string()]);

        assert_eq!(
            admin.list_all_applications(&ctx).await.unwrap(),
            vec![data.application.clone()]
        );
        assert_eq!(
            admin.list_all_cluster_access(&ctx).await.unwrap(),
            vec![data.access.clone()]
        );
        assert_eq!(admin.list_all_managed_environments(&ctx).await.unwrap().len(), 1);
        assert_eq!(admin.list_all_gitops_engine_instances(&ctx).await.unwrap().len(), 1);
        assert_eq!(admin.list_all_gitops_engine_clusters(&ctx).await.unwrap().len(), 1);
        assert_eq!(admin.list_all_cluster_credentials(&ctx).await.unwrap().len(), 1);
        assert_eq!(admin.list_all_application_states(&ctx).await.unwrap().len(), 1);
        assert_eq!(
            admin
                .list_all_deployment_to_application_mappings(&ctx)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(admin.list_all_operations(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_cluster_access_is_conflict() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let data = fixtures::seed(&db).await;
        let admin = db.unsafe_queries(true);
        let ctx = QueryContext::background();

        let err = admin
            .create_cluster_access(&ctx, &data.access)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(admin.list_all_cluster_access(&ctx).await.unwrap().len(), 1);

        assert_eq!(admin.delete_cluster_access(&ctx, &data.access).await.unwrap(), 1);
        assert_eq!(admin.delete_cluster_access(&ctx, &data.access).await.unwrap(), 0);
        assert!(admin
            .get_cluster_access(&ctx, &data.access)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_updates_replace_whole_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let data = fixtures::seed(&db).await;
        let admin = db.unsafe_queries(true);
        let ctx = QueryContext::background();

        let mut app = data.application.clone();
        app.name = "renamed".to_string();
        admin.update_application(&ctx, &app).await.unwrap();
        assert_eq!(admin.get_application_by_id(&ctx, &app.id).await.unwrap(), app);

        let state = ApplicationState {
            application_id: app.id.clone(),
            state: r#"{"health":"Degraded"}"#.to_string(),
        };
        admin.update_application_state(&ctx, &state).await.unwrap();
        assert_eq!(
            admin.get_application_state_by_id(&ctx, &app.id).await.unwrap(),
            state
        );

        let mut missing = app.clone();
        missing.id = "app-missing".to_string();
        assert!(admin
            .update_application(&ctx, &missing)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_operation_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let admin = db.unsafe_queries(true);
        let ctx = QueryContext::background();

        let mut op = admin
            .create_operation(&ctx, &Operation::new("i1", "app1", "Application", "u1"))
            .await
            .unwrap();

        // Privileged update may reassign the owner.
        op.owner_user_id = "u2".to_string();
        op.state = gitops_core::OperationState::InProgress;
        admin.update_operation(&ctx, &op).await.unwrap();

        let fetched = admin.get_operation_by_id(&ctx, &op.id).await.unwrap();
        assert_eq!(fetched.owner_user_id, "u2");
        assert_eq!(fetched.state, gitops_core::OperationState::InProgress);

        assert_eq!(admin.delete_operation_by_id(&ctx, &op.id).await.unwrap(), 1);
        assert!(admin
            .update_operation(&ctx, &op)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_delete_application_cascades() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let data = fixtures::seed(&db).await;
        let admin = db.unsafe_queries(true);
        let ctx = QueryContext::background();

        assert_eq!(
            admin
                .delete_application_by_id(&ctx, &data.application.id)
                .await
                .unwrap(),
            1
        );
        assert!(admin
            .get_application_state_by_id(&ctx, &data.application.id)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(admin
            .list_all_deployment_to_application_mappings(&ctx)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(
            admin
                .delete_application_by_id(&ctx, &data.application.id)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_failed_cascade_rolls_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let data = fixtures::seed(&db).await;
        fixtures::block_mapping_deletes(&db).await;
        let admin = db.unsafe_queries(true);
        let ctx = QueryContext::background();

        let err = admin
            .delete_application_by_id(&ctx, &data.application.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected, "{err}");

        assert_eq!(
            admin
                .get_application_by_id(&ctx, &data.application.id)
                .await
                .unwrap(),
            data.application
        );
        assert_eq!(
            admin
                .get_application_state_by_id(&ctx, &data.application.id)
                .await
                .unwrap(),
            data.application_state
        );
        assert_eq!(
            admin
                .list_all_deployment_to_application_mappings(&ctx)
                .await
                .unwrap(),
            vec![data.mapping]
        );
    }
}
