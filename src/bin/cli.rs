use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use notes_rbac::audit::{AuditSink, AuditStore};
use notes_rbac::authz::{AccessDecisionPoint, PermissionCache, PermissionResolver, RbacService};
use notes_rbac::db::audit::SqliteAuditLog;
use notes_rbac::models::rbac::{EffectivePermissionsResponse, PermissionCreateRequest, RoleCreateRequest};

#[derive(Parser, Debug)]
#[command(author, version, about = "notes-rbac operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create a permission (name defaults to RESOURCE:ACTION)
    CreatePermission {
        resource: String,
        action: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Create a role, optionally inheriting roles and holding permissions
    CreateRole {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Mark the role immutable
        #[arg(long)]
        system: bool,
        #[arg(long = "inherits")]
        inherits: Vec<String>,
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },
    /// Make PARENT inherit every permission of CHILD
    Inherit { parent: String, child: String },
    CreateUser {
        username: String,
        #[arg(long)]
        email: Option<String>,
    },
    AssignRole { username: String, role: String },
    RevokeRole { username: String, role: String },
    /// Print a user's effective permissions
    Effective { username: String },
    /// Print the permissions a role grants, inherited ones included
    RolePermissions { role: String },
    /// Evaluate (and audit) one access decision
    Check {
        username: String,
        resource: String,
        action: String,
        #[arg(long)]
        resource_id: Option<String>,
    },
    /// Show recorded decisions of a user, newest first
    Audit {
        username: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::CreatePermission {
            resource,
            action,
            name,
            description,
        } => {
            let service = rbac_service(&pool);
            let permission = service
                .create_permission(PermissionCreateRequest {
                    name,
                    resource,
                    action,
                    description,
                })
                .await?;
            println!("Created permission {} ({})", permission.name, permission.id);
        }
        Commands::CreateRole {
            name,
            description,
            system,
            inherits,
            permissions,
        } => {
            let service = rbac_service(&pool);
            let role = service
                .create_composite_role(RoleCreateRequest {
                    name,
                    description,
                    is_system: system,
                    inherits,
                    permissions,
                })
                .await?;
            println!("Created role {} ({})", role.name, role.id);
        }
        Commands::Inherit { parent, child } => {
            let service = rbac_service(&pool);
            let parent_role = service
                .find_role_by_name(&parent)
                .await?
                .with_context(|| format!("role {} not found", parent))?;
            let child_role = service
                .find_role_by_name(&child)
                .await?
                .with_context(|| format!("role {} not found", child))?;
            service.add_child_role(parent_role.id, child_role.id).await?;
            println!("{} now inherits {}", parent, child);
        }
        Commands::CreateUser { username, email } => {
            let user = rbac_service(&pool).create_user(&username, email.as_deref()).await?;
            println!("Created user {} ({})", user.username, user.id);
        }
        Commands::AssignRole { username, role } => {
            rbac_service(&pool).assign_role_to_user(&username, &role).await?;
            println!("Assigned {} to {}", role, username);
        }
        Commands::RevokeRole { username, role } => {
            rbac_service(&pool).remove_role_from_user(&username, &role).await?;
            println!("Revoked {} from {}", role, username);
        }
        Commands::Effective { username } => {
            let effective = PermissionResolver::new(pool.clone()).user_permissions(&username).await?;
            let response = EffectivePermissionsResponse::from(&effective);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::RolePermissions { role } => {
            let permissions = PermissionResolver::new(pool.clone()).role_permissions_by_name(&role).await?;
            let mut names: Vec<String> = permissions.into_iter().map(|p| p.name).collect();
            names.sort();
            for name in names {
                println!("{}", name);
            }
        }
        Commands::Check {
            username,
            resource,
            action,
            resource_id,
        } => {
            let store: Arc<dyn AuditStore> = Arc::new(SqliteAuditLog::new(pool.clone()));
            let (sink, writer) = AuditSink::spawn(store);
            let cache = Arc::new(PermissionCache::new(PermissionResolver::new(pool.clone())));
            let access = AccessDecisionPoint::new(cache, sink);

            let granted = access.check(&username, &resource, &action, resource_id.as_deref()).await?;

            // closing the last sender lets the writer drain and exit
            drop(access);
            writer.await.context("audit writer failed")?;

            println!("{}", if granted { "GRANTED" } else { "DENIED" });
        }
        Commands::Audit { username, limit } => {
            let records = SqliteAuditLog::new(pool.clone()).by_username(&username).await?;
            println!("{:<6} {:<32} {:<24} {:<8} {}", "Id", "Timestamp", "Permission", "Granted", "Resource id");
            for record in records.into_iter().take(limit) {
                println!(
                    "{:<6} {:<32} {:<24} {:<8} {}",
                    record.id,
                    record.timestamp.to_rfc3339(),
                    record.permission,
                    record.granted,
                    record.resource_id.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

fn rbac_service(pool: &SqlitePool) -> RbacService {
    let cache = Arc::new(PermissionCache::new(PermissionResolver::new(pool.clone())));
    RbacService::new(pool.clone(), cache)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when run from the repo root, else the crate's own folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
