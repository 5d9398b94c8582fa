//! One-way data migrations over the entity database.
//!
//! A migration is a folder `NNN-some-name/` holding a `migrate.json` script
//! manifest and any data files it reads. The code it runs is registered in a
//! [`ScriptRegistry`] under the same name. The [`MigrationRunner`] applies a
//! migration at most once: a record under `migration-logs/<name>/` marks it applied.

pub mod context;
pub mod loader;
pub mod log_store;
pub mod manager;
pub mod registry;
pub mod runner;
pub mod scripts;
pub mod tracker;
pub mod vcs;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use context::{MigrationContext, Services};
pub use loader::{LoadError, LoadedScript, ScriptLoader, ScriptMetadata};
pub use log_store::{ChangeSummary, FileLogStore, LogStoreError, MigrationLog, MigrationLogStore};
pub use manager::{ManagerError, MigrationManager};
pub use registry::{MigrationScript, ScriptModule, ScriptRegistry, Symbol, builtin_registry};
pub use runner::{MigrationRunner, RunnerConfig};
pub use tracker::{ChangeTracker, Counts, Delta};
pub use vcs::{GitCli, VcsError, VersionControl};

/// File name of the script manifest inside a migration folder.
pub const SCRIPT_FILE: &str = "migrate.json";

lazy_static! {
    static ref MIGRATION_NAME_REGEX: Regex =
        Regex::new(r"^(\d{3})-[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
}

/// Identifies one migration on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Migration {
    pub prefix: u32,
    /// Full folder name, e.g. `003-source-2082-political-parties`
    pub name: String,
    pub folder_path: PathBuf,
    pub script_path: PathBuf,
}

impl Migration {
    /// Build a descriptor from a migration folder. Returns `None` unless the folder
    /// name is `NNN-lowercase-words`.
    pub fn from_folder(folder: impl Into<PathBuf>) -> Option<Self> {
        let folder_path = folder.into();
        let name = folder_path.file_name()?.to_str()?.to_string();
        let prefix = Self::parse_prefix(&name)?;
        let script_path = folder_path.join(SCRIPT_FILE);
        Some(Self {
            prefix,
            name,
            folder_path,
            script_path,
        })
    }

    pub fn parse_prefix(name: &str) -> Option<u32> {
        let caps = MIGRATION_NAME_REGEX.captures(name)?;
        caps[1].parse().ok()
    }

    pub fn is_valid_name(name: &str) -> bool {
        MIGRATION_NAME_REGEX.is_match(name)
    }

    pub fn folder(&self) -> &Path {
        &self.folder_path
    }
}

impl Ord for Migration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix
            .cmp(&other.prefix)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Migration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a migration ended up `FAILED`.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Failed to load migration script: {0}")]
    Load(#[from] LoadError),

    #[error(
        "Cannot run migration {migration}: Database has uncommitted changes. \
         Please commit or stash changes before running migrations."
    )]
    DirtyTree { migration: String },

    #[error("Cannot run migration {migration}: uncommitted-changes check failed: {source}")]
    Preflight {
        migration: String,
        #[source]
        source: VcsError,
    },

    #[error("{0:#}")]
    Script(anyhow::Error),

    #[error("Failed to store migration log: {0}")]
    LogStore(#[from] LogStoreError),
}

/// Outcome of one `run_migration` call.
#[derive(Debug)]
pub struct MigrationResult<'a> {
    pub migration: &'a Migration,
    pub status: MigrationStatus,
    /// Set once execution starts, even when the script fails.
    pub duration_seconds: Option<f64>,
    pub entities_created: i64,
    pub relationships_created: i64,
    pub versions_created: i64,
    /// Present iff `status == Failed`.
    pub error: Option<MigrationError>,
    pub logs: Vec<String>,
}

impl<'a> MigrationResult<'a> {
    pub fn new(migration: &'a Migration) -> Self {
        Self {
            migration,
            status: MigrationStatus::Running,
            duration_seconds: None,
            entities_created: 0,
            relationships_created: 0,
            versions_created: 0,
            error: None,
            logs: Vec::new(),
        }
    }

    /// Mark the result failed, recording the error message in the logs.
    pub fn fail(&mut self, error: MigrationError) {
        self.logs.push(error.to_string());
        self.status = MigrationStatus::Failed;
        self.error = Some(error);
    }

    pub fn apply_delta(&mut self, delta: Delta) {
        self.entities_created = delta.entities;
        self.relationships_created = delta.relationships;
        self.versions_created = delta.versions;
    }

    pub fn is_failed(&self) -> bool {
        self.status == MigrationStatus::Failed
    }

    pub fn summary(&self) -> String {
        format!(
            "Created {} entities, {} relationships, and {} versions",
            self.entities_created, self.relationships_created, self.versions_created
        )
    }
}

/// Tally of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[MigrationResult<'_>]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                MigrationStatus::Completed => summary.completed += 1,
                MigrationStatus::Skipped => summary.skipped += 1,
                MigrationStatus::Failed => summary.failed += 1,
                MigrationStatus::Running => {}
            }
        }
        summary
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} skipped, {} failed",
            self.completed, self.skipped, self.failed
        )
    }
}
