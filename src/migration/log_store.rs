use super::loader::ScriptMetadata;
use super::{Migration, MigrationResult, MigrationStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// Directory under the database root holding one folder per applied migration.
pub const MIGRATION_LOGS_DIR: &str = "migration-logs";

const METADATA_FILE: &str = "metadata.json";
const DIFF_FILE: &str = "changes.diff";
const LOGS_FILE: &str = "logs.txt";

#[derive(Error, Debug)]
pub enum LogStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to persist log file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub entities_created: i64,
    pub relationships_created: i64,
    pub versions_created: i64,
    pub summary: String,
    pub has_diff: bool,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationLog {
    pub migration_name: String,
    pub author: String,
    pub date: Option<String>,
    pub description: String,
    pub executed_at: String,
    pub duration_seconds: Option<f64>,
    pub status: MigrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_checksum: Option<String>,
    pub changes: ChangeSummary,
}

/// Durable record of applied migrations.
///
/// A migration counts as applied exactly when its record exists, so `store`
/// must never leave a record behind for a migration it failed to persist.
#[async_trait]
pub trait MigrationLogStore: Send + Sync {
    async fn is_applied(&self, migration: &Migration) -> bool;

    async fn store(
        &self,
        result: &MigrationResult<'_>,
        metadata: &ScriptMetadata,
        diff: Option<&str>,
    ) -> Result<(), LogStoreError>;

    async fn read(&self, migration_name: &str) -> Result<Option<MigrationLog>, LogStoreError>;

    async fn list(&self) -> Result<Vec<MigrationLog>, LogStoreError>;
}

/// Log store rooted at `<db>/migration-logs`.
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store for the database at `db_path`.
    pub fn for_database(db_path: &Path) -> Self {
        Self::new(db_path.join(MIGRATION_LOGS_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self, migration_name: &str) -> PathBuf {
        self.root.join(migration_name)
    }
}

#[async_trait]
impl MigrationLogStore for FileLogStore {
    async fn is_applied(&self, migration: &Migration) -> bool {
        tokio::fs::metadata(self.log_dir(&migration.name).join(METADATA_FILE))
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn store(
        &self,
        result: &MigrationResult<'_>,
        metadata: &ScriptMetadata,
        diff: Option<&str>,
    ) -> Result<(), LogStoreError> {
        let name = &result.migration.name;
        let dir = self.log_dir(name);
        tokio::fs::create_dir_all(&dir).await?;
        info!("Storing migration log in {}", dir.display());

        let executed_at = Utc::now().to_rfc3339();
        let diff = diff.filter(|d| !d.is_empty());

        write_atomic(&dir, LOGS_FILE, render_logs(result, &executed_at).as_bytes())?;

        let diff_path = dir.join(DIFF_FILE);
        match diff {
            Some(diff) => write_atomic(&dir, DIFF_FILE, diff.as_bytes())?,
            None => match tokio::fs::remove_file(&diff_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }

        let log = MigrationLog {
            migration_name: name.clone(),
            author: metadata.author.clone(),
            date: metadata.parsed_date().map(|date| date.to_string()),
            description: metadata.description.clone(),
            executed_at,
            duration_seconds: result.duration_seconds,
            status: result.status,
            script_checksum: Some(metadata.checksum.clone()).filter(|c| !c.is_empty()),
            changes: ChangeSummary {
                entities_created: result.entities_created,
                relationships_created: result.relationships_created,
                versions_created: result.versions_created,
                summary: result.summary(),
                has_diff: diff.is_some(),
            },
        };
        // written last: its presence is what marks the migration applied
        let json = serde_json::to_string_pretty(&log)?;
        write_atomic(&dir, METADATA_FILE, json.as_bytes())?;

        debug!("Stored migration log for {}", name);
        Ok(())
    }

    async fn read(&self, migration_name: &str) -> Result<Option<MigrationLog>, LogStoreError> {
        let path = self.log_dir(migration_name).join(METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<MigrationLog>, LogStoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut logs = Vec::new();
        for name in names {
            if let Some(log) = self.read(&name).await? {
                logs.push(log);
            }
        }
        Ok(logs)
    }
}

fn render_logs(result: &MigrationResult<'_>, executed_at: &str) -> String {
    let rule = "=".repeat(80);
    let mut out = format!(
        "Migration: {}\nExecuted at: {}\nDuration: {:.1}s\n\n{rule}\nExecution Logs:\n{rule}\n\n",
        result.migration.name,
        executed_at,
        result.duration_seconds.unwrap_or_default(),
    );
    for line in &result.logs {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Write through a temp file in the same directory, then rename into place.
fn write_atomic(dir: &Path, file_name: &str, contents: &[u8]) -> Result<(), LogStoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(file_name))?;
    Ok(())
}
