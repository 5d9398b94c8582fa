use async_trait::async_trait;
use nes_migrate::migration::{
    FileLogStore, LogStoreError, Migration, MigrationLog, MigrationLogStore, MigrationResult,
    MigrationRunner, RunnerConfig, ScriptLoader, ScriptMetadata, ScriptRegistry, Services,
    VcsError, VersionControl,
};
use nes_migrate::storage::{Entity, EntityType, FileDatabase, Name};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// Scripted stand-in for git.
pub struct FakeVcs {
    repository: AtomicBool,
    failure: Mutex<Option<String>>,
    /// Answers consumed by `diff` calls in order; `standing` answers once empty.
    queued: Mutex<VecDeque<Option<String>>>,
    standing: Mutex<Option<String>>,
    diff_calls: AtomicUsize,
    pub commits: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeVcs {
    pub fn clean() -> Self {
        Self {
            repository: AtomicBool::new(true),
            failure: Mutex::new(None),
            queued: Mutex::new(VecDeque::new()),
            standing: Mutex::new(None),
            diff_calls: AtomicUsize::new(0),
            commits: Mutex::new(Vec::new()),
        }
    }

    pub fn not_a_repository() -> Self {
        let vcs = Self::clean();
        vcs.repository.store(false, Ordering::SeqCst);
        vcs
    }

    pub fn set_dirty(&self, diff: &str) {
        *self.standing.lock() = Some(diff.to_string());
    }

    pub fn set_clean(&self) {
        *self.standing.lock() = None;
    }

    pub fn set_failure(&self, stderr: &str) {
        *self.failure.lock() = Some(stderr.to_string());
    }

    pub fn queue(&self, answer: Option<&str>) {
        self.queued.lock().push_back(answer.map(str::to_string));
    }

    pub fn diff_calls(&self) -> usize {
        self.diff_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    fn is_repository(&self) -> bool {
        self.repository.load(Ordering::SeqCst)
    }

    async fn diff(&self) -> Result<Option<String>, VcsError> {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_repository() {
            return Err(VcsError::NotARepository(PathBuf::from("/fake")));
        }
        if let Some(stderr) = self.failure.lock().clone() {
            return Err(VcsError::CommandFailed {
                command: "git diff HEAD".to_string(),
                stderr,
            });
        }
        if let Some(answer) = self.queued.lock().pop_front() {
            return Ok(answer);
        }
        Ok(self.standing.lock().clone())
    }

    async fn commit(&self, message: &str) -> Result<(), VcsError> {
        self.commits.lock().push(message.to_string());
        Ok(())
    }
}

/// File log store whose writes can be made to fail.
pub struct FlakyLogStore {
    inner: FileLogStore,
    fail_store: AtomicBool,
}

#[allow(dead_code)]
impl FlakyLogStore {
    pub fn new(inner: FileLogStore) -> Self {
        Self {
            inner,
            fail_store: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_store.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &FileLogStore {
        &self.inner
    }
}

#[async_trait]
impl MigrationLogStore for FlakyLogStore {
    async fn is_applied(&self, migration: &Migration) -> bool {
        self.inner.is_applied(migration).await
    }

    async fn store(
        &self,
        result: &MigrationResult<'_>,
        metadata: &ScriptMetadata,
        diff: Option<&str>,
    ) -> Result<(), LogStoreError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(LogStoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.store(result, metadata, diff).await
    }

    async fn read(&self, migration_name: &str) -> Result<Option<MigrationLog>, LogStoreError> {
        self.inner.read(migration_name).await
    }

    async fn list(&self) -> Result<Vec<MigrationLog>, LogStoreError> {
        self.inner.list().await
    }
}

/// A database, a migrations folder and fakes, all under one temp dir.
#[allow(dead_code)]
pub struct TestEnv {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub migrations_dir: PathBuf,
    pub db: Arc<FileDatabase>,
    pub vcs: Arc<FakeVcs>,
    pub log_store: Arc<FlakyLogStore>,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        Self::with_vcs(FakeVcs::clean()).await
    }

    pub async fn with_vcs(vcs: FakeVcs) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nes-db").join("v2");
        let migrations_dir = dir.path().join("migrations");
        std::fs::create_dir_all(&migrations_dir).unwrap();

        let db = Arc::new(FileDatabase::open(&db_path).await.unwrap());
        let log_store = Arc::new(FlakyLogStore::new(FileLogStore::for_database(&db_path)));
        Self {
            dir,
            db_path,
            migrations_dir,
            db,
            vcs: Arc::new(vcs),
            log_store,
        }
    }

    /// Write a migration folder with the given manifest text.
    pub fn write_migration(&self, name: &str, manifest: &str) -> Migration {
        let folder = self.migrations_dir.join(name);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("migrate.json"), manifest).unwrap();
        Migration::from_folder(folder).unwrap()
    }

    /// Write a migration folder with a complete manifest.
    pub fn add_migration(&self, name: &str) -> Migration {
        self.write_migration(name, &manifest("Test Author", "2025-01-15", &format!("Test migration {}", name)))
    }

    pub fn write_data_file(&self, migration: &Migration, file: &str, contents: &[u8]) {
        std::fs::write(migration.folder().join(file), contents).unwrap();
    }

    pub fn runner(&self, registry: ScriptRegistry) -> MigrationRunner {
        self.runner_with(registry, RunnerConfig::default())
    }

    pub fn runner_with(&self, registry: ScriptRegistry, config: RunnerConfig) -> MigrationRunner {
        MigrationRunner::new(
            Services::file_backed(self.db.clone()),
            ScriptLoader::new(registry),
            self.log_store.clone(),
            self.vcs.clone(),
            self.db.version_dir(),
            config,
        )
    }

    pub fn log_dir(&self, name: &str) -> PathBuf {
        self.db_path.join("migration-logs").join(name)
    }

    /// Store `count` people directly, without version records.
    pub async fn seed_people(&self, count: usize) {
        for i in 0..count {
            let slug = format!("seed-person-{}", i);
            let mut entity = Entity::new(&slug, EntityType::Person)
                .with_name(Name::primary(format!("Seed Person {}", i)));
            entity.id = Entity::make_id(EntityType::Person, &slug);
            entity.version = 1;
            self.db.put_entity(&entity).await.unwrap();
        }
    }
}

pub fn manifest(author: &str, date: &str, description: &str) -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "AUTHOR": author,
        "DATE": date,
        "DESCRIPTION": description,
    }))
    .unwrap()
}
