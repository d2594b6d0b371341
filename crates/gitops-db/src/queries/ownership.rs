//! # Ownership Predicates
//!
//! One authorization rule per entity, rendered into the `WHERE` clause of
//! the statement that reads or deletes the row.
//!
//! ## Ownership Chains
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Can See What                                     │
//! │                                                                         │
//! │  Operation ──────────── owner_user_id = caller                          │
//! │  ClusterUser ────────── id = caller                                     │
//! │                                                                         │
//! │  ClusterAccess(user, env, instance)  ← the only grant                   │
//! │       │                                                                 │
//! │       ├── ManagedEnvironment     env.id = ca.env                        │
//! │       ├── GitOpsEngineInstance   instance.id = ca.instance              │
//! │       │        └── GitOpsEngineCluster   via instance.enginecluster_id  │
//! │       ├── ClusterCredentials     via environment OR engine cluster      │
//! │       └── Application            (env, instance) pair both granted      │
//! │                └── ApplicationState / DeploymentToApplicationMapping    │
//! │                                                                         │
//! │  SELECT t.* FROM t WHERE t.key = ?1 AND <predicate using ?2>           │
//! │                                                                         │
//! │  A row the caller may not see and a row that does not exist both       │
//! │  match zero rows. There is no second query to race against.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bind order is fixed for every statement built here: the key is `?1` and
//! the caller's user id is `?2`.

use gitops_core::validation::validate_id;
use gitops_core::{
    Application, ApplicationState, ClusterCredentials, ClusterUser,
    DeploymentToApplicationMapping, GitOpsEngineCluster, GitOpsEngineInstance,
    ManagedEnvironment, Operation,
};
use sqlx::SqlitePool;

use super::table::Keyed;
use crate::context::QueryContext;
use crate::error::{DbError, DbResult};

/// Field name reported when the caller id fails validation.
pub(crate) const CALLER_FIELD: &str = "caller_user_id";

/// How a row is tied to the user allowed to see it.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Ownership {
    /// A column of the row itself must equal the caller.
    OwnerColumn(&'static str),
    /// An `EXISTS` test over the join rows. `{t}` stands for the table.
    Chain(&'static str),
}

impl Ownership {
    /// Renders the predicate for `table`, with the caller bound as `?2`.
    pub(crate) fn predicate(&self, table: &str) -> String {
        match self {
            Ownership::OwnerColumn(column) => format!("{table}.{column} = ?2"),
            Ownership::Chain(template) => template.replace("{t}", table),
        }
    }
}

/// An entity readable through the scoped engine.
pub(crate) trait ScopedEntity: Keyed {
    const OWNERSHIP: Ownership;
}

const ENVIRONMENT_CHAIN: &str = "EXISTS (SELECT 1 FROM clusteraccess ca \
     WHERE ca.managed_environment_id = {t}.id AND ca.user_id = ?2)";

const INSTANCE_CHAIN: &str = "EXISTS (SELECT 1 FROM clusteraccess ca \
     WHERE ca.gitops_engine_instance_id = {t}.id AND ca.user_id = ?2)";

const ENGINE_CLUSTER_CHAIN: &str = "EXISTS (SELECT 1 FROM gitopsengineinstance gei \
     JOIN clusteraccess ca ON ca.gitops_engine_instance_id = gei.id \
     WHERE gei.enginecluster_id = {t}.id AND ca.user_id = ?2)";

const CREDENTIALS_CHAIN: &str = "(EXISTS (SELECT 1 FROM managedenvironment me \
     JOIN clusteraccess ca ON ca.managed_environment_id = me.id \
     WHERE me.clustercredentials_id = {t}.id AND ca.user_id = ?2) \
     OR EXISTS (SELECT 1 FROM gitopsenginecluster gec \
     JOIN gitopsengineinstance gei ON gei.enginecluster_id = gec.id \
     JOIN clusteraccess ca ON ca.gitops_engine_instance_id = gei.id \
     WHERE gec.clustercredentials_id = {t}.id AND ca.user_id = ?2))";

/// Both halves of the (environment, instance) pair must be granted together.
pub(crate) const APPLICATION_CHAIN: &str = "EXISTS (SELECT 1 FROM clusteraccess ca \
     WHERE ca.managed_environment_id = {t}.managed_environment_id \
     AND ca.gitops_engine_instance_id = {t}.engine_instance_id AND ca.user_id = ?2)";

const APPLICATION_CHILD_CHAIN: &str = "EXISTS (SELECT 1 FROM application a \
     JOIN clusteraccess ca ON ca.managed_environment_id = a.managed_environment_id \
     AND ca.gitops_engine_instance_id = a.engine_instance_id \
     WHERE a.id = {t}.application_id AND ca.user_id = ?2)";

impl ScopedEntity for ClusterUser {
    const OWNERSHIP: Ownership = Ownership::OwnerColumn("id");
}

impl ScopedEntity for ClusterCredentials {
    const OWNERSHIP: Ownership = Ownership::Chain(CREDENTIALS_CHAIN);
}

impl ScopedEntity for GitOpsEngineCluster {
    const OWNERSHIP: Ownership = Ownership::Chain(ENGINE_CLUSTER_CHAIN);
}

impl ScopedEntity for GitOpsEngineInstance {
    const OWNERSHIP: Ownership = Ownership::Chain(INSTANCE_CHAIN);
}

impl ScopedEntity for ManagedEnvironment {
    const OWNERSHIP: Ownership = Ownership::Chain(ENVIRONMENT_CHAIN);
}

impl ScopedEntity for Application {
    const OWNERSHIP: Ownership = Ownership::Chain(APPLICATION_CHAIN);
}

impl ScopedEntity for ApplicationState {
    const OWNERSHIP: Ownership = Ownership::Chain(APPLICATION_CHILD_CHAIN);
}

impl ScopedEntity for DeploymentToApplicationMapping {
    const OWNERSHIP: Ownership = Ownership::Chain(APPLICATION_CHILD_CHAIN);
}

impl ScopedEntity for Operation {
    const OWNERSHIP: Ownership = Ownership::OwnerColumn("owner_user_id");
}

/// Checks a key and the caller id before any round trip.
pub(crate) fn validate_scoped_key<T: ScopedEntity>(id: &str, caller: &str) -> DbResult<()> {
    validate_id(T::ID_FIELD, id)?;
    validate_id(CALLER_FIELD, caller)?;
    Ok(())
}

pub(crate) fn owned_select_sql<T: ScopedEntity>() -> String {
    format!(
        "SELECT {t}.* FROM {t} WHERE {t}.{key} = ?1 AND {pred}",
        t = T::TABLE,
        key = T::KEY,
        pred = T::OWNERSHIP.predicate(T::TABLE),
    )
}

pub(crate) fn owned_delete_sql<T: ScopedEntity>() -> String {
    format!(
        "DELETE FROM {t} WHERE {t}.{key} = ?1 AND {pred}",
        t = T::TABLE,
        key = T::KEY,
        pred = T::OWNERSHIP.predicate(T::TABLE),
    )
}

/// Fetches `id` if, and only if, `caller` may see it.
pub(crate) async fn fetch_owned<T: ScopedEntity>(
    pool: &SqlitePool,
    ctx: &QueryContext,
    id: &str,
    caller: &str,
) -> DbResult<T> {
    validate_scoped_key::<T>(id, caller)?;

    let sql = owned_select_sql::<T>();

    let row = ctx
        .run(
            sqlx::query_as::<_, T>(&sql)
                .bind(id)
                .bind(caller)
                .fetch_optional(pool),
        )
        .await?;

    row.ok_or_else(|| DbError::not_found(T::ENTITY, id))
}

/// Deletes `id` if `caller` owns it. Zero means absent or not the caller's.
pub(crate) async fn delete_owned<T: ScopedEntity>(
    pool: &SqlitePool,
    ctx: &QueryContext,
    id: &str,
    caller: &str,
) -> DbResult<u64> {
    validate_scoped_key::<T>(id, caller)?;

    let sql = owned_delete_sql::<T>();

    let result = ctx
        .run(sqlx::query(&sql).bind(id).bind(caller).execute(pool))
        .await?;

    Ok(result.rows_affected())
}

/// The error for a scoped create whose ClusterAccess grant is missing.
///
/// Reported as the absent grant so it reads the same as any other lookup
/// the caller is not entitled to.
pub(crate) fn missing_grant(
    caller: &str,
    environment_id: Option<&str>,
    instance_id: Option<&str>,
) -> DbError {
    DbError::not_found(
        "ClusterAccess",
        format!(
            "{}/{}/{}",
            caller,
            environment_id.unwrap_or("*"),
            instance_id.unwrap_or("*")
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_owner_column_predicate() {
        let sql = owned_select_sql::<Operation>();
        assert_eq!(
            sql,
            "SELECT operation.* FROM operation WHERE operation.id = ?1 \
             AND operation.owner_user_id = ?2"
        );
    }

    #[test]
    fn test_chain_predicate_names_the_table() {
        let pred = ApplicationState::OWNERSHIP.predicate("applicationstate");
        assert!(pred.contains("a.id = applicationstate.application_id"));
        assert!(!pred.contains("{t}"));

        let delete = owned_delete_sql::<ManagedEnvironment>();
        assert!(delete.starts_with("DELETE FROM managedenvironment WHERE managedenvironment.id = ?1"));
        assert!(delete.contains("ca.managed_environment_id = managedenvironment.id"));
    }

    #[test]
    fn test_every_chain_binds_caller_as_second_param() {
        for pred in [
            ClusterCredentials::OWNERSHIP.predicate("x"),
            GitOpsEngineCluster::OWNERSHIP.predicate("x"),
            GitOpsEngineInstance::OWNERSHIP.predicate("x"),
            ManagedEnvironment::OWNERSHIP.predicate("x"),
            Application::OWNERSHIP.predicate("x"),
            DeploymentToApplicationMapping::OWNERSHIP.predicate("x"),
            ClusterUser::OWNERSHIP.predicate("x"),
        ] {
            assert!(pred.contains("?2"), "{pred}");
            assert!(!pred.contains("?3"), "{pred}");
        }
    }

    #[test]
    fn test_empty_caller_is_invalid_argument() {
        let err = validate_scoped_key::<Application>("app1", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_missing_grant_is_not_found() {
        let err = missing_grant("u1", Some("env1"), None);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "ClusterAccess not found: u1/env1/*");
    }
}
