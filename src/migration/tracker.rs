use super::vcs::{VcsError, VersionControl};
use crate::storage::EntityDatabase;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;

/// Entity, relationship and version record counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub entities: usize,
    pub relationships: usize,
    pub versions: usize,
}

/// Signed difference between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delta {
    pub entities: i64,
    pub relationships: i64,
    pub versions: i64,
}

impl Counts {
    pub fn delta(&self, after: &Counts) -> Delta {
        Delta {
            entities: after.entities as i64 - self.entities as i64,
            relationships: after.relationships as i64 - self.relationships as i64,
            versions: after.versions as i64 - self.versions as i64,
        }
    }
}

/// Measures what a migration changed.
///
/// Counting is best-effort: a count that cannot be read is reported as zero
/// and a warning goes to the migration's logs.
pub struct ChangeTracker {
    db: Arc<dyn EntityDatabase>,
    version_dir: PathBuf,
    vcs: Arc<dyn VersionControl>,
}

impl ChangeTracker {
    pub fn new(db: Arc<dyn EntityDatabase>, version_dir: impl Into<PathBuf>, vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            db,
            version_dir: version_dir.into(),
            vcs,
        }
    }

    pub async fn snapshot(&self, logs: &mut Vec<String>) -> Counts {
        let entities = match self.db.count_entities().await {
            Ok(n) => n,
            Err(e) => {
                note(logs, format!("failed to count entities: {}", e));
                0
            }
        };
        let relationships = match self.db.count_relationships().await {
            Ok(n) => n,
            Err(e) => {
                note(logs, format!("failed to count relationships: {}", e));
                0
            }
        };
        let versions = match count_version_records(&self.version_dir) {
            Ok(n) => n,
            Err(e) => {
                note(logs, format!("failed to count version records: {}", e));
                0
            }
        };

        Counts {
            entities,
            relationships,
            versions,
        }
    }

    /// Diff of the database directory after execution, if there is one to take.
    pub async fn capture_diff(&self, logs: &mut Vec<String>) -> Option<String> {
        match self.vcs.diff().await {
            Ok(diff) => diff,
            Err(VcsError::NotARepository(_)) => None,
            Err(e) => {
                note(logs, format!("failed to capture changes diff: {}", e));
                None
            }
        }
    }
}

fn note(logs: &mut Vec<String>, message: String) {
    warn!("{}", message);
    logs.push(format!("WARNING: {}", message));
}

/// Count `.json` files under the version directory. A missing directory holds none.
pub fn count_version_records(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "json") {
            count += 1;
        }
    }
    Ok(count)
}
