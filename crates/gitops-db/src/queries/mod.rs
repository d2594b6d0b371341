//! # Query Engines
//!
//! The two entry points to the store.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Engines, One Pool                                │
//! │                                                                         │
//! │   request handlers                    reconcilers / fixtures            │
//! │        │                                       │                        │
//! │        ▼                                       ▼                        │
//! │  ┌───────────────┐                   ┌──────────────────┐               │
//! │  │ ScopedQueries │                   │  UnsafeQueries   │               │
//! │  │ caller on     │                   │  allow_unsafe    │               │
//! │  │ every call    │                   │  checked per call│               │
//! │  └───────┬───────┘                   └────────┬─────────┘               │
//! │          │ ownership predicates               │ no predicate            │
//! │          ▼                                    ▼                         │
//! │  ┌──────────────────────────────────────────────────────┐               │
//! │  │ table: Table / Keyed metadata, inserts, keyed I/O    │               │
//! │  └──────────────────────────────────────────────────────┘               │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                          SqlitePool                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engines share helpers but not names: nothing reachable through
//! [`ScopedQueries`] skips the ownership predicate.
//!
//! - [`ScopedQueries`] - ownership-checked CRUD for request paths
//! - [`UnsafeQueries`] - unchecked CRUD behind the unsafe opt-in

mod ownership;
pub mod privileged;
pub mod scoped;
mod table;

pub use privileged::UnsafeQueries;
pub use scoped::ScopedQueries;

#[cfg(test)]
pub(crate) mod fixtures {
    //! Sample topology shared by the engine tests.

    use gitops_core::{
        Application, ApplicationState, ClusterAccess, ClusterCredentials, ClusterUser,
        DeploymentToApplicationMapping, GitOpsEngineCluster, GitOpsEngineInstance,
        ManagedEnvironment,
    };

    use crate::{Database, QueryContext};

    /// Everything [`seed`] wrote. `u1` holds the only grant; `u2` has none.
    pub struct SampleData {
        pub credentials: ClusterCredentials,
        pub engine_cluster: GitOpsEngineCluster,
        pub instance: GitOpsEngineInstance,
        pub environment: ManagedEnvironment,
        pub access: ClusterAccess,
        pub application: Application,
        pub application_state: ApplicationState,
        pub mapping: DeploymentToApplicationMapping,
    }

    pub async fn seed(db: &Database) -> SampleData {
        let admin = db.unsafe_queries(true);
        let ctx = QueryContext::background();

        for (id, name) in [("u1", "alice"), ("u2", "bob")] {
            admin
                .create_cluster_user(
                    &ctx,
                    &ClusterUser {
                        id: id.to_string(),
                        user_name: name.to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let data = SampleData {
            credentials: ClusterCredentials {
                id: "creds1".to_string(),
                host: "https://api.cluster.example:6443".to_string(),
                kube_config: "apiVersion: v1\nkind: Config\n".to_string(),
                kube_config_context: "default".to_string(),
                serviceaccount_bearer_token: "token-1".to_string(),
                serviceaccount_ns: "gitops-service".to_string(),
            },
            engine_cluster: GitOpsEngineCluster {
                id: "c1".to_string(),
                clustercredentials_id: "creds1".to_string(),
            },
            instance: GitOpsEngineInstance {
                id: "i1".to_string(),
                namespace_name: "argocd".to_string(),
                namespace_uid: "uid-1".to_string(),
                enginecluster_id: "c1".to_string(),
            },
            environment: ManagedEnvironment {
                id: "env1".to_string(),
                name: "production".to_string(),
                clustercredentials_id: "creds1".to_string(),
            },
            access: ClusterAccess {
                user_id: "u1".to_string(),
                managed_environment_id: "env1".to_string(),
                gitops_engine_instance_id: "i1".to_string(),
            },
            application: Application {
                id: "app1".to_string(),
                name: "guestbook".to_string(),
                spec_field: r#"{"source":{"repoURL":"https://github.com/example/apps","path":"guestbook"}}"#
                    .to_string(),
                engine_instance_id: "i1".to_string(),
                managed_environment_id: "env1".to_string(),
            },
            application_state: ApplicationState {
                application_id: "app1".to_string(),
                state: r#"{"health":"Healthy","sync":"Synced"}"#.to_string(),
            },
            mapping: DeploymentToApplicationMapping {
                id: "dtam1".to_string(),
                application_id: "app1".to_string(),
            },
        };

        admin
            .create_cluster_credentials(&ctx, &data.credentials)
            .await
            .unwrap();
        admin
            .create_gitops_engine_cluster(&ctx, &data.engine_cluster)
            .await
            .unwrap();
        admin
            .create_gitops_engine_instance(&ctx, &data.instance)
            .await
            .unwrap();
        admin
            .create_managed_environment(&ctx, &data.environment)
            .await
            .unwrap();
        admin.create_cluster_access(&ctx, &data.access).await.unwrap();
        admin
            .create_application(&ctx, &data.application)
            .await
            .unwrap();
        admin
            .create_application_state(&ctx, &data.application_state)
            .await
            .unwrap();
        admin
            .create_deployment_to_application_mapping(&ctx, &data.mapping)
            .await
            .unwrap();

        data
    }

    /// Makes every delete on `deploymenttoapplicationmapping` abort, so the
    /// last step of the Application cascade fails.
    pub async fn block_mapping_deletes(db: &Database) {
        sqlx::query(
            "CREATE TRIGGER block_mapping_delete BEFORE DELETE ON deploymenttoapplicationmapping \
             BEGIN SELECT RAISE(ABORT, 'mapping delete blocked'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();
    }
}

// =============================================================================
// End-to-end tests across both engines
// =============================================================================
