use super::context::{MigrationContext, Services};
use super::loader::ScriptLoader;
use super::log_store::{FileLogStore, MigrationLogStore};
use super::registry::ScriptRegistry;
use super::tracker::ChangeTracker;
use super::vcs::{GitCli, VcsError, VersionControl};
use super::{BatchSummary, Migration, MigrationError, MigrationResult, MigrationStatus};
use crate::storage::{FileDatabase, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Setting this to `true` disables the uncommitted-changes preflight check.
pub const GIT_DIFF_CHECK_DISABLED_ENV: &str = "NES_MIGRATIONS_GIT_DIFF_CHECK_DISABLED";

const NO_REPOSITORY_WARNING: &str =
    "WARNING: Database is not a git repository; changes diff will not be recorded";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Skip the uncommitted-changes check before each migration.
    pub skip_preflight: bool,
    /// Commit the database tree after each successfully recorded migration.
    pub commit_after_apply: bool,
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let skip_preflight = std::env::var(GIT_DIFF_CHECK_DISABLED_ENV)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            skip_preflight,
            ..Self::default()
        }
    }
}

pub struct MigrationRunner {
    services: Services,
    loader: ScriptLoader,
    tracker: ChangeTracker,
    log_store: Arc<dyn MigrationLogStore>,
    vcs: Arc<dyn VersionControl>,
    config: RunnerConfig,
}

impl MigrationRunner {
    pub fn new(
        services: Services,
        loader: ScriptLoader,
        log_store: Arc<dyn MigrationLogStore>,
        vcs: Arc<dyn VersionControl>,
        version_dir: impl Into<PathBuf>,
        config: RunnerConfig,
    ) -> Self {
        if !vcs.is_repository() {
            warn!("Database is not a git repository; migration diffs will not be captured");
        }
        let tracker = ChangeTracker::new(Arc::clone(&services.db), version_dir, Arc::clone(&vcs));
        Self {
            services,
            loader,
            tracker,
            log_store,
            vcs,
            config,
        }
    }

    /// Runner over the file database at `db_path`, logging to `<db_path>/migration-logs`
    /// and diffing the git repository that contains the database directory.
    pub async fn open(
        db_path: &Path,
        registry: ScriptRegistry,
        config: RunnerConfig,
        vcs_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let db = Arc::new(FileDatabase::open(db_path).await?);
        let version_dir = db.version_dir();
        let repo_root = db_path.parent().unwrap_or(db_path).to_path_buf();

        Ok(Self::new(
            Services::file_backed(db),
            ScriptLoader::new(registry),
            Arc::new(FileLogStore::for_database(db_path)),
            Arc::new(GitCli::new(repo_root, vcs_timeout)),
            version_dir,
            config,
        ))
    }

    pub fn loader(&self) -> &ScriptLoader {
        &self.loader
    }

    pub fn log_store(&self) -> &dyn MigrationLogStore {
        self.log_store.as_ref()
    }

    pub fn config(&self) -> RunnerConfig {
        self.config
    }

    /// Apply one migration, unless its record says it is already applied.
    ///
    /// Never returns an error: every failure is reported through the result.
    pub async fn run_migration<'a>(&self, migration: &'a Migration) -> MigrationResult<'a> {
        let mut result = MigrationResult::new(migration);
        info!("Running migration {}", migration.name);

        if !self.vcs.is_repository() {
            result.logs.push(NO_REPOSITORY_WARNING.to_string());
        }

        if self.config.skip_preflight {
            warn!(
                "{} is set; skipping uncommitted-changes check for {}",
                GIT_DIFF_CHECK_DISABLED_ENV, migration.name
            );
        } else if let Err(e) = self.preflight(migration).await {
            error!("{}", e);
            result.fail(e);
            return result;
        }

        if self.log_store.is_applied(migration).await {
            let message = format!("Migration {} already applied, skipping", migration.name);
            info!("{}", message);
            result.logs.push(message);
            result.status = MigrationStatus::Skipped;
            return result;
        }

        let loaded = match self.loader.load(migration) {
            Ok(loaded) => loaded,
            Err(e) => {
                result.fail(MigrationError::Load(e));
                return result;
            }
        };
        result.logs.push(format!(
            "Loaded migration {} by {}: {}",
            migration.name, loaded.metadata.author, loaded.metadata.description
        ));

        let before = self.tracker.snapshot(&mut result.logs).await;

        let ctx = MigrationContext::new(&self.services, migration);
        let started = Instant::now();
        let outcome = loaded.entry_point.migrate(&ctx).await;
        result.duration_seconds = Some(started.elapsed().as_secs_f64());
        result.logs.extend(ctx.into_logs());

        let after = self.tracker.snapshot(&mut result.logs).await;
        result.apply_delta(before.delta(&after));

        if let Err(e) = outcome {
            error!("Migration {} failed: {:#}", migration.name, e);
            result.logs.push(format!("ERROR: {:#}", e));
            result.logs.push(format!("Traceback:\n{:?}", e));
            result.status = MigrationStatus::Failed;
            result.error = Some(MigrationError::Script(e));
            return result;
        }

        result.status = MigrationStatus::Completed;
        let diff = self.tracker.capture_diff(&mut result.logs).await;
        let summary = result.summary();
        result.logs.push(summary);

        if let Err(e) = self
            .log_store
            .store(&result, &loaded.metadata, diff.as_deref())
            .await
        {
            error!("Failed to store migration log for {}: {}", migration.name, e);
            result.logs.push(format!("ERROR: Failed to store migration log: {}", e));
            result.status = MigrationStatus::Failed;
            result.error = Some(MigrationError::LogStore(e));
            return result;
        }

        if self.config.commit_after_apply {
            self.commit(migration, &loaded.metadata.author, &loaded.metadata.description, &mut result.logs)
                .await;
        }

        info!(
            "Migration {} completed in {:.1}s: {}",
            migration.name,
            result.duration_seconds.unwrap_or_default(),
            result.summary()
        );
        result
    }

    /// Apply migrations in the order given. With `stop_on_failure`, the first
    /// failed result is the last one returned.
    pub async fn run_migrations<'a>(
        &self,
        migrations: &'a [Migration],
        stop_on_failure: bool,
    ) -> Vec<MigrationResult<'a>> {
        info!("Running {} migrations", migrations.len());
        let mut results = Vec::with_capacity(migrations.len());

        for (index, migration) in migrations.iter().enumerate() {
            info!("[{}/{}] {}", index + 1, migrations.len(), migration.name);
            let result = self.run_migration(migration).await;
            let failed = result.is_failed();
            results.push(result);

            if failed && stop_on_failure {
                error!("Stopping batch after failed migration {}", migration.name);
                break;
            }
        }

        info!("Migration batch finished: {}", BatchSummary::from_results(&results));
        results
    }

    async fn preflight(&self, migration: &Migration) -> Result<(), MigrationError> {
        match self.vcs.diff().await {
            Ok(None) | Err(VcsError::NotARepository(_)) => Ok(()),
            Ok(Some(_)) => Err(MigrationError::DirtyTree {
                migration: migration.name.clone(),
            }),
            Err(source) => Err(MigrationError::Preflight {
                migration: migration.name.clone(),
                source,
            }),
        }
    }

    async fn commit(&self, migration: &Migration, author: &str, description: &str, logs: &mut Vec<String>) {
        let message = format!(
            "Migration: {}\n\n{}\n\nAuthor: {}",
            migration.name, description, author
        );
        match self.vcs.commit(&message).await {
            Ok(()) => info!("Committed changes for {}", migration.name),
            Err(e) => {
                warn!("Failed to commit changes for {}: {}", migration.name, e);
                logs.push(format!("WARNING: Failed to commit changes: {}", e));
            }
        }
    }
}
