use anyhow::{Result, anyhow};
use std::sync::Arc;
use tracing::{error, info};

use nes_migrate::config::{Command, Config};
use nes_migrate::migration::{
    BatchSummary, FileLogStore, MigrationError, MigrationLogStore, MigrationManager,
    MigrationRunner, MigrationStatus, builtin_registry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .init();

    info!("nes-migrate v{}", env!("CARGO_PKG_VERSION"));

    let log_store = Arc::new(FileLogStore::for_database(&config.db_path));
    let manager = MigrationManager::new(&config.migrations_dir, log_store.clone());

    match &config.command {
        Command::List => {
            for migration in manager.discover()? {
                let mark = if log_store.is_applied(&migration).await { "x" } else { " " };
                println!("[{}] {}", mark, migration.name);
            }
        }
        Command::Pending => {
            let pending = manager.pending().await?;
            if pending.is_empty() {
                println!("No pending migrations.");
            }
            for migration in pending {
                println!("{}", migration.name);
            }
        }
        Command::Show { name } => {
            let log = log_store
                .read(name)
                .await?
                .ok_or_else(|| anyhow!("Migration {} has not been applied", name))?;
            println!("{}", serde_json::to_string_pretty(&log)?);
        }
        Command::Create {
            slug,
            author,
            description,
        } => {
            let migration = manager.create_migration(slug, author, description)?;
            println!("Created {}", migration.folder().display());
            println!(
                "Register its code in the script registry under \"{}\" before running it.",
                migration.name
            );
        }
        Command::Run {
            name,
            continue_on_failure,
            commit,
        } => {
            let migrations = match name {
                Some(name) => vec![
                    manager
                        .find(name)?
                        .ok_or_else(|| anyhow!("No migration named {} in {}", name, manager.migrations_dir().display()))?,
                ],
                None => manager.discover()?,
            };
            if migrations.is_empty() {
                info!("No migrations found in {}", manager.migrations_dir().display());
                return Ok(());
            }

            let runner = MigrationRunner::open(
                &config.db_path,
                builtin_registry(),
                config.runner_config(*commit),
                config.git_timeout(),
            )
            .await?;

            let results = runner.run_migrations(&migrations, !continue_on_failure).await;
            for result in &results {
                match result.status {
                    MigrationStatus::Failed => {
                        let reason = result
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_default();
                        println!("FAILED    {}: {}", result.migration.name, reason);
                    }
                    status => println!("{:<9} {}", status.as_str().to_uppercase(), result.migration.name),
                }
            }

            let summary = BatchSummary::from_results(&results);
            println!("{}", summary);
            if summary.failed > 0 {
                error!("{} migration(s) failed", summary.failed);
                let dirty = results
                    .iter()
                    .any(|r| matches!(r.error, Some(MigrationError::DirtyTree { .. })));
                if dirty && !*commit {
                    println!("Commit the database changes, or rerun with --commit to commit after each migration.");
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
