use super::log_store::{LogStoreError, MigrationLogStore};
use super::{Migration, SCRIPT_FILE};
use chrono::Local;
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid migration name {0:?}: expected lowercase words joined by '-'")]
    InvalidName(String),
    #[error("Migration already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    LogStore(#[from] LogStoreError),
}

/// Finds migration folders and tells applied ones from pending ones.
pub struct MigrationManager {
    migrations_dir: PathBuf,
    log_store: Arc<dyn MigrationLogStore>,
}

impl MigrationManager {
    pub fn new(migrations_dir: impl Into<PathBuf>, log_store: Arc<dyn MigrationLogStore>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            log_store,
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// All migration folders, sorted by prefix then name. Entries that are not
    /// `NNN-name` directories are ignored.
    pub fn discover(&self) -> Result<Vec<Migration>, ManagerError> {
        let entries = match std::fs::read_dir(&self.migrations_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Migrations directory {} does not exist", self.migrations_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match Migration::from_folder(entry.path()) {
                Some(migration) => migrations.push(migration),
                None => debug!("Ignoring {}", entry.path().display()),
            }
        }
        migrations.sort();
        Ok(migrations)
    }

    pub fn find(&self, name: &str) -> Result<Option<Migration>, ManagerError> {
        Ok(self.discover()?.into_iter().find(|m| m.name == name))
    }

    pub async fn applied(&self) -> Result<Vec<Migration>, ManagerError> {
        let mut applied = Vec::new();
        for migration in self.discover()? {
            if self.log_store.is_applied(&migration).await {
                applied.push(migration);
            }
        }
        Ok(applied)
    }

    pub async fn pending(&self) -> Result<Vec<Migration>, ManagerError> {
        let mut pending = Vec::new();
        for migration in self.discover()? {
            if !self.log_store.is_applied(&migration).await {
                pending.push(migration);
            }
        }
        Ok(pending)
    }

    /// Scaffold `NNN-<slug>/` with the next free prefix, a script manifest and a README.
    ///
    /// The migration's code still has to be registered under the returned name.
    pub fn create_migration(
        &self,
        slug: &str,
        author: &str,
        description: &str,
    ) -> Result<Migration, ManagerError> {
        let next_prefix = self
            .discover()?
            .iter()
            .map(|m| m.prefix + 1)
            .max()
            .unwrap_or(0);
        let name = format!("{:03}-{}", next_prefix, slug);
        if !Migration::is_valid_name(&name) {
            return Err(ManagerError::InvalidName(slug.to_string()));
        }

        let folder = self.migrations_dir.join(&name);
        if folder.exists() {
            return Err(ManagerError::AlreadyExists(folder));
        }
        std::fs::create_dir_all(&folder)?;

        let manifest = json!({
            "AUTHOR": author,
            "DATE": Local::now().date_naive().to_string(),
            "DESCRIPTION": description,
            "ENTRY_POINT": "migrate",
        });
        let mut manifest = serde_json::to_string_pretty(&manifest).map_err(std::io::Error::other)?;
        manifest.push('\n');
        std::fs::write(folder.join(SCRIPT_FILE), manifest)?;
        std::fs::write(folder.join("README.md"), readme(&name, author, description))?;

        info!("Created migration {} in {}", name, folder.display());
        Migration::from_folder(folder.clone()).ok_or(ManagerError::InvalidName(name))
    }
}

fn readme(name: &str, author: &str, description: &str) -> String {
    format!(
        "# {name}\n\n{description}\n\nAuthor: {author}\n\n\
         Data files for this migration live next to `{SCRIPT_FILE}` and are read through\n\
         the migration context (`read_csv`, `read_json`, `read_excel`).\n"
    )
}
