//! # Seed Data Generator
//!
//! Populates a development database with a small multi-tenant topology.
//!
//! ## Usage
//! ```bash
//! # Three tenants (default)
//! cargo run -p gitops-db --bin seed
//!
//! # Custom tenant count and database path
//! cargo run -p gitops-db --bin seed -- --users 10 --db ./data/gitops.db
//!
//! # More log output
//! RUST_LOG=gitops_db=debug cargo run -p gitops-db --bin seed
//! ```
//!
//! ## Generated Rows
//! One shared engine cluster and instance, then per user `user-N`:
//! - a managed environment `env-N` with its own credentials
//! - a ClusterAccess grant for (`user-N`, `env-N`, the shared instance)
//! - two applications with state and a deployment mapping each
//! - one waiting operation per application

use std::env;

use gitops_core::{
    Application, ApplicationState, ClusterAccess, ClusterCredentials, ClusterUser,
    DeploymentToApplicationMapping, GitOpsEngineCluster, GitOpsEngineInstance,
    ManagedEnvironment, Operation,
};
use gitops_db::migrations::migration_status;
use gitops_db::{Database, DbConfig, QueryContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

const APPS_PER_USER: usize = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut users: usize = 3;
    let mut db_path = String::from("./gitops_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--users" | "-u" => {
                if i + 1 < args.len() {
                    users = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("GitOps Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -u, --users <N>    Number of tenant users to generate (default: 3)");
                println!("  -d, --db <PATH>    Database file path (default: ./gitops_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("GitOps Seed Data Generator");
    println!("==========================");
    println!("Database: {}", db_path);
    println!("Users:    {}", users);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let (total, applied) = migration_status(db.pool()).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied ({}/{})", applied, total);

    let admin = db.unsafe_queries(true);
    let ctx = QueryContext::background();

    let existing = admin.list_all_cluster_users(&ctx).await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} users", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();

    admin
        .create_cluster_credentials(&ctx, &credentials("creds-engine", "engine"))
        .await?;
    let cluster = GitOpsEngineCluster {
        id: "engine-cluster-1".to_string(),
        clustercredentials_id: "creds-engine".to_string(),
    };
    admin.create_gitops_engine_cluster(&ctx, &cluster).await?;
    let instance = GitOpsEngineInstance {
        id: "engine-instance-1".to_string(),
        namespace_name: "gitops-service-argocd".to_string(),
        namespace_uid: "00000000-0000-0000-0000-000000000001".to_string(),
        enginecluster_id: cluster.id.clone(),
    };
    admin.create_gitops_engine_instance(&ctx, &instance).await?;

    let mut applications = 0;
    let mut operations = 0;

    for n in 1..=users {
        let user_id = format!("user-{n}");
        admin
            .create_cluster_user(
                &ctx,
                &ClusterUser {
                    id: user_id.clone(),
                    user_name: format!("tenant-{n}"),
                },
            )
            .await?;

        let creds_id = format!("creds-env-{n}");
        admin
            .create_cluster_credentials(&ctx, &credentials(&creds_id, &format!("tenant-{n}")))
            .await?;

        let environment = ManagedEnvironment {
            id: format!("env-{n}"),
            name: format!("tenant-{n}-staging"),
            clustercredentials_id: creds_id,
        };
        admin.create_managed_environment(&ctx, &environment).await?;

        admin
            .create_cluster_access(
                &ctx,
                &ClusterAccess {
                    user_id: user_id.clone(),
                    managed_environment_id: environment.id.clone(),
                    gitops_engine_instance_id: instance.id.clone(),
                },
            )
            .await?;

        // Application rows go through the scoped engine, as a request would.
        let scoped = db.scoped();
        for a in 1..=APPS_PER_USER {
            let app_id = format!("app-{n}-{a}");
            let application = Application {
                id: app_id.clone(),
                name: format!("guestbook-{a}"),
                spec_field: format!(
                    r#"{{"source":{{"repoURL":"https://github.com/tenant-{n}/apps","path":"guestbook-{a}"}},"destination":{{"namespace":"tenant-{n}"}}}}"#
                ),
                engine_instance_id: instance.id.clone(),
                managed_environment_id: environment.id.clone(),
            };
            scoped.create_application(&ctx, &application, &user_id).await?;

            admin
                .create_application_state(
                    &ctx,
                    &ApplicationState {
                        application_id: app_id.clone(),
                        state: r#"{"health":"Progressing","sync":"OutOfSync"}"#.to_string(),
                    },
                )
                .await?;
            scoped
                .create_deployment_to_application_mapping(
                    &ctx,
                    &DeploymentToApplicationMapping {
                        id: format!("deployment-{n}-{a}"),
                        application_id: app_id.clone(),
                    },
                    &user_id,
                )
                .await?;

            let operation = Operation::new(&instance.id, &app_id, "Application", &user_id);
            let created = scoped.create_operation(&ctx, &operation, &user_id).await?;
            info!(id = %created.id, application = %app_id, "Queued operation");

            applications += 1;
            operations += 1;
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!(
        "✓ Generated {} users, {} applications, {} operations in {:?}",
        users, applications, operations, elapsed
    );

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}

fn credentials(id: &str, context: &str) -> ClusterCredentials {
    ClusterCredentials {
        id: id.to_string(),
        host: "https://api.dev-cluster.local:6443".to_string(),
        kube_config: String::new(),
        kube_config_context: context.to_string(),
        serviceaccount_bearer_token: format!("dev-token-{id}"),
        serviceaccount_ns: "gitops-service".to_string(),
    }
}
