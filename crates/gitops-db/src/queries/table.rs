//! Table metadata and the unchecked keyed executors built on it.
//!
//! Nothing in here applies an authorization predicate. Scoped callers go
//! through [`super::ownership`] instead.

use gitops_core::validation::{validate_id, Validate};
use gitops_core::{
    Application, ApplicationState, ClusterAccess, ClusterCredentials, ClusterUser,
    DeploymentToApplicationMapping, GitOpsEngineCluster, GitOpsEngineInstance,
    ManagedEnvironment, Operation,
};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::context::QueryContext;
use crate::error::{DbError, DbResult};

/// A record type backed by one table.
pub(crate) trait Table: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'static {
    /// Entity name used in errors and logs.
    const ENTITY: &'static str;
    const TABLE: &'static str;
}

/// A table with a single-column primary key.
pub(crate) trait Keyed: Table {
    const KEY: &'static str;
    /// Field name reported when the key fails validation.
    const ID_FIELD: &'static str;
}

macro_rules! table {
    ($ty:ty, $entity:literal, $table:literal) => {
        impl Table for $ty {
            const ENTITY: &'static str = $entity;
            const TABLE: &'static str = $table;
        }
    };
    ($ty:ty, $entity:literal, $table:literal, $key:literal, $id_field:literal) => {
        table!($ty, $entity, $table);

        impl Keyed for $ty {
            const KEY: &'static str = $key;
            const ID_FIELD: &'static str = $id_field;
        }
    };
}

table!(ClusterUser, "ClusterUser", "clusteruser", "id", "clusteruser_id");
table!(
    ClusterCredentials,
    "ClusterCredentials",
    "clustercredentials",
    "id",
    "clustercredentials_id"
);
table!(
    GitOpsEngineCluster,
    "GitOpsEngineCluster",
    "gitopsenginecluster",
    "id",
    "gitopsenginecluster_id"
);
table!(
    GitOpsEngineInstance,
    "GitOpsEngineInstance",
    "gitopsengineinstance",
    "id",
    "gitopsengineinstance_id"
);
table!(
    ManagedEnvironment,
    "ManagedEnvironment",
    "managedenvironment",
    "id",
    "managedenvironment_id"
);
table!(ClusterAccess, "ClusterAccess", "clusteraccess");
table!(Application, "Application", "application", "id", "application_id");
table!(
    ApplicationState,
    "ApplicationState",
    "applicationstate",
    "application_id",
    "application_id"
);
table!(Operation, "Operation", "operation", "id", "operation_id");
table!(
    DeploymentToApplicationMapping,
    "DeploymentToApplicationMapping",
    "deploymenttoapplicationmapping",
    "id",
    "deploymenttoapplicationmapping_id"
);

// =============================================================================
// Plain inserts
// =============================================================================

/// A record that can be written as-is with one `INSERT`.
pub(crate) trait Insert: Table + Validate + Sync {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>>;
}

impl Insert for ClusterUser {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query("INSERT INTO clusteruser (id, user_name) VALUES (?1, ?2)")
            .bind(&self.id)
            .bind(&self.user_name)
    }
}

impl Insert for ClusterCredentials {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO clustercredentials (
                id, host, kube_config, kube_config_context,
                serviceaccount_bearer_token, serviceaccount_ns
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&self.id)
        .bind(&self.host)
        .bind(&self.kube_config)
        .bind(&self.kube_config_context)
        .bind(&self.serviceaccount_bearer_token)
        .bind(&self.serviceaccount_ns)
    }
}

impl Insert for GitOpsEngineCluster {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query("INSERT INTO gitopsenginecluster (id, clustercredentials_id) VALUES (?1, ?2)")
            .bind(&self.id)
            .bind(&self.clustercredentials_id)
    }
}

impl Insert for GitOpsEngineInstance {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO gitopsengineinstance (id, namespace_name, namespace_uid, enginecluster_id)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&self.id)
        .bind(&self.namespace_name)
        .bind(&self.namespace_uid)
        .bind(&self.enginecluster_id)
    }
}

impl Insert for ManagedEnvironment {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            "INSERT INTO managedenvironment (id, name, clustercredentials_id) VALUES (?1, ?2, ?3)",
        )
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.clustercredentials_id)
    }
}

impl Insert for ClusterAccess {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO clusteraccess (user_id, managed_environment_id, gitops_engine_instance_id)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&self.user_id)
        .bind(&self.managed_environment_id)
        .bind(&self.gitops_engine_instance_id)
    }
}

impl Insert for Application {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO application (
                id, name, spec_field, engine_instance_id, managed_environment_id
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.spec_field)
        .bind(&self.engine_instance_id)
        .bind(&self.managed_environment_id)
    }
}

impl Insert for ApplicationState {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query("INSERT INTO applicationstate (application_id, state) VALUES (?1, ?2)")
            .bind(&self.application_id)
            .bind(&self.state)
    }
}

impl Insert for DeploymentToApplicationMapping {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            "INSERT INTO deploymenttoapplicationmapping (id, application_id) VALUES (?1, ?2)",
        )
        .bind(&self.id)
        .bind(&self.application_id)
    }
}

impl Insert for Operation {
    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO operation (
                id, instance_id, resource_id, resource_type, state,
                human_readable_state, owner_user_id, created_on, last_state_update
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&self.id)
        .bind(&self.instance_id)
        .bind(&self.resource_id)
        .bind(&self.resource_type)
        .bind(self.state)
        .bind(&self.human_readable_state)
        .bind(&self.owner_user_id)
        .bind(self.created_on)
        .bind(self.last_state_update)
    }
}

/// Validates `record` and writes it with no authorization predicate.
pub(crate) async fn insert_row<T: Insert>(
    pool: &SqlitePool,
    ctx: &QueryContext,
    record: &T,
) -> DbResult<()> {
    record.validate()?;

    ctx.run(record.insert_query().execute(pool)).await?;

    Ok(())
}

// =============================================================================
// Unchecked executors
// =============================================================================

/// Every row of `T`'s table, in no particular order.
pub(crate) async fn list_all<T: Table>(pool: &SqlitePool, ctx: &QueryContext) -> DbResult<Vec<T>> {
    let sql = format!("SELECT * FROM {}", T::TABLE);

    ctx.run(sqlx::query_as::<_, T>(&sql).fetch_all(pool)).await
}

pub(crate) async fn fetch_by_key<T: Keyed>(
    pool: &SqlitePool,
    ctx: &QueryContext,
    id: &str,
) -> DbResult<T> {
    validate_id(T::ID_FIELD, id)?;

    let sql = format!("SELECT * FROM {} WHERE {} = ?1", T::TABLE, T::KEY);

    let row = ctx
        .run(sqlx::query_as::<_, T>(&sql).bind(id).fetch_optional(pool))
        .await?;

    row.ok_or_else(|| DbError::not_found(T::ENTITY, id))
}

pub(crate) async fn delete_by_key<T: Keyed>(
    pool: &SqlitePool,
    ctx: &QueryContext,
    id: &str,
) -> DbResult<u64> {
    validate_id(T::ID_FIELD, id)?;

    let sql = format!("DELETE FROM {} WHERE {} = ?1", T::TABLE, T::KEY);

    let result = ctx.run(sqlx::query(&sql).bind(id).execute(pool)).await?;

    Ok(result.rows_affected())
}

/// Removes the rows that hang off an application.
///
/// Called inside the transaction that deleted the application itself.
pub(crate) async fn delete_application_children(
    conn: &mut SqliteConnection,
    application_id: &str,
) -> DbResult<()> {
    sqlx::query("DELETE FROM applicationstate WHERE application_id = ?1")
        .bind(application_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM deploymenttoapplicationmapping WHERE application_id = ?1")
        .bind(application_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

// =============================================================================
// Operation rows
// =============================================================================

/// Helper to generate a new operation ID.
pub(crate) fn generate_operation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fills in a missing operation id and validates the record.
pub(crate) fn prepare_operation(operation: &Operation) -> DbResult<Operation> {
    let mut operation = operation.clone();
    if operation.id.is_empty() {
        operation.id = generate_operation_id();
    }
    operation.validate()?;
    Ok(operation)
}

/// Whole-row replace of an operation.
///
/// `owner_filter` adds `AND owner_user_id = ?10` when set; the owner column
/// itself is never rewritten by the scoped path.
pub(crate) async fn update_operation_row(
    pool: &SqlitePool,
    ctx: &QueryContext,
    operation: &Operation,
    owner_filter: Option<&str>,
) -> DbResult<u64> {
    let sql = match owner_filter {
        Some(_) => OPERATION_UPDATE_SCOPED,
        None => OPERATION_UPDATE,
    };

    let mut query = sqlx::query(sql)
        .bind(&operation.id)
        .bind(&operation.instance_id)
        .bind(&operation.resource_id)
        .bind(&operation.resource_type)
        .bind(operation.state)
        .bind(&operation.human_readable_state)
        .bind(&operation.owner_user_id)
        .bind(operation.created_on)
        .bind(operation.last_state_update);
    if let Some(owner) = owner_filter {
        query = query.bind(owner);
    }

    let result = ctx.run(query.execute(pool)).await?;

    Ok(result.rows_affected())
}

const OPERATION_UPDATE: &str = r#"
    UPDATE operation SET
        instance_id = ?2,
        resource_id = ?3,
        resource_type = ?4,
        state = ?5,
        human_readable_state = ?6,
        owner_user_id = ?7,
        created_on = ?8,
        last_state_update = ?9
    WHERE id = ?1
"#;

const OPERATION_UPDATE_SCOPED: &str = r#"
    UPDATE operation SET
        instance_id = ?2,
        resource_id = ?3,
        resource_type = ?4,
        state = ?5,
        human_readable_state = ?6,
        owner_user_id = ?7,
        created_on = ?8,
        last_state_update = ?9
    WHERE id = ?1 AND owner_user_id = ?10
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, ErrorKind};

    #[tokio::test]
    async fn test_fetch_by_key_rejects_empty_key_before_store() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        // A closed pool proves no round trip happens.
        db.close().await;

        let err = fetch_by_key::<ClusterUser>(db.pool(), &QueryContext::background(), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_delete_by_key_counts_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ctx = QueryContext::background();
        sqlx::query("INSERT INTO clusteruser (id, user_name) VALUES ('u1', 'one')")
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(delete_by_key::<ClusterUser>(db.pool(), &ctx, "u1").await.unwrap(), 1);
        assert_eq!(delete_by_key::<ClusterUser>(db.pool(), &ctx, "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_row_duplicate_key_is_conflict() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ctx = QueryContext::background();
        let user = ClusterUser {
            id: "u1".to_string(),
            user_name: "one".to_string(),
        };

        insert_row(db.pool(), &ctx, &user).await.unwrap();
        let err = insert_row(db.pool(), &ctx, &user).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let fetched: ClusterUser = fetch_by_key(db.pool(), &ctx, "u1").await.unwrap();
        assert_eq!(fetched, user);
    }

    #[tokio::test]
    async fn test_operation_row_survives_store() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ctx = QueryContext::background();
        let mut op = prepare_operation(&Operation::new("i1", "r1", "Application", "u1")).unwrap();
        op.human_readable_state = Some("queued".to_string());

        insert_row(db.pool(), &ctx, &op).await.unwrap();
        let fetched: Operation = fetch_by_key(db.pool(), &ctx, &op.id).await.unwrap();
        assert_eq!(fetched, op);
    }

    #[test]
    fn test_prepare_operation_assigns_id_once() {
        let op = Operation::new("i1", "r1", "GitopsEngineInstance", "u1");
        let prepared = prepare_operation(&op).unwrap();
        assert!(!prepared.id.is_empty());

        let again = prepare_operation(&prepared).unwrap();
        assert_eq!(again.id, prepared.id);
    }
}
