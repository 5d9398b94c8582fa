use super::Migration;
use crate::services::{
    DatabaseSearch, PublicationService, Publisher, Scraper, ScrapingService, SearchService,
};
use crate::storage::{
    Entity, EntityDatabase, EntityQuery, EntityType, FileDatabase, Language, Relationship,
    StorageError,
};
use anyhow::{Context as _, anyhow, bail};
use calamine::{Reader, open_workbook_auto};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One row of a CSV or spreadsheet, keyed by header.
pub type Row = BTreeMap<String, String>;

/// Service handles shared by every migration a runner executes.
#[derive(Clone)]
pub struct Services {
    pub publication: Arc<dyn PublicationService>,
    pub search: Arc<dyn SearchService>,
    pub scraping: Arc<dyn ScrapingService>,
    pub db: Arc<dyn EntityDatabase>,
}

impl Services {
    /// Wire the default services on top of a file database.
    pub fn file_backed(db: Arc<FileDatabase>) -> Self {
        Self {
            publication: Arc::new(Publisher::new(Arc::clone(&db))),
            search: Arc::new(DatabaseSearch::new(db.clone())),
            scraping: Arc::new(Scraper::new()),
            db,
        }
    }
}

/// Everything a migration script may touch.
///
/// Built fresh for each migration. The log buffer is the only state it owns; the
/// runner reads it back once the script returns.
pub struct MigrationContext {
    services: Services,
    migration_name: String,
    migration_dir: PathBuf,
    logs: Mutex<Vec<String>>,
}

impl MigrationContext {
    pub fn new(services: &Services, migration: &Migration) -> Self {
        Self {
            services: services.clone(),
            migration_name: migration.name.clone(),
            migration_dir: migration.folder_path.clone(),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn publication(&self) -> &dyn PublicationService {
        self.services.publication.as_ref()
    }

    pub fn search(&self) -> &dyn SearchService {
        self.services.search.as_ref()
    }

    pub fn scraping(&self) -> &dyn ScrapingService {
        self.services.scraping.as_ref()
    }

    /// Read-only database access.
    pub fn db(&self) -> &dyn EntityDatabase {
        self.services.db.as_ref()
    }

    pub fn migration_dir(&self) -> &Path {
        &self.migration_dir
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", self.migration_name, message);
        self.logs.lock().push(message);
    }

    /// Snapshot of the log lines written so far.
    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    pub fn into_logs(self) -> Vec<String> {
        self.logs.into_inner()
    }

    /// Resolve a data file inside the migration folder. Absolute paths and `..`
    /// components are rejected.
    pub fn resolve(&self, filename: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let filename = filename.as_ref();
        let escapes = filename
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            bail!(
                "{} is outside the migration folder {}",
                filename.display(),
                self.migration_dir.display()
            );
        }
        Ok(self.migration_dir.join(filename))
    }

    pub fn read_csv(&self, filename: impl AsRef<Path>) -> anyhow::Result<Vec<Row>> {
        let path = self.resolve(filename)?;
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let headers = reader.headers()?.clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("failed to parse {}", path.display()))?;
            rows.push(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, value)| (header.to_string(), value.to_string()))
                    .collect(),
            );
        }
        Ok(rows)
    }

    pub fn read_json(&self, filename: impl AsRef<Path>) -> anyhow::Result<Value> {
        self.read_json_as(filename)
    }

    pub fn read_json_as<T: DeserializeOwned>(&self, filename: impl AsRef<Path>) -> anyhow::Result<T> {
        let path = self.resolve(filename)?;
        let bytes = std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Read a worksheet; the first row holds the headers. Defaults to the first sheet.
    pub fn read_excel(&self, filename: impl AsRef<Path>, sheet_name: Option<&str>) -> anyhow::Result<Vec<Row>> {
        let path = self.resolve(filename)?;
        let mut workbook = open_workbook_auto(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let sheet = match sheet_name {
            Some(name) => name.to_string(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("{} has no sheets", path.display()))?,
        };
        let range = workbook
            .worksheet_range(&sheet)
            .with_context(|| format!("failed to read sheet {} of {}", sheet, path.display()))?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row.iter().map(|cell| cell.to_string()).collect(),
            None => return Ok(Vec::new()),
        };
        Ok(rows
            .map(|row| {
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(header, cell)| (header.clone(), cell.to_string()))
                    .collect()
            })
            .collect())
    }

    pub async fn create_entity(
        &self,
        entity: Entity,
        author_id: &str,
        change_description: &str,
    ) -> Result<Entity, StorageError> {
        self.publication().create_entity(entity, author_id, change_description).await
    }

    pub async fn update_entity(
        &self,
        entity: Entity,
        author_id: &str,
        change_description: &str,
    ) -> Result<Entity, StorageError> {
        self.publication().update_entity(entity, author_id, change_description).await
    }

    pub async fn create_relationship(
        &self,
        relationship: Relationship,
        author_id: &str,
        change_description: &str,
    ) -> Result<Relationship, StorageError> {
        self.publication()
            .create_relationship(relationship, author_id, change_description)
            .await
    }

    pub async fn update_relationship(
        &self,
        relationship: Relationship,
        author_id: &str,
        change_description: &str,
    ) -> Result<Relationship, StorageError> {
        self.publication()
            .update_relationship(relationship, author_id, change_description)
            .await
    }

    pub async fn search_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>, StorageError> {
        self.search().search_entities(query).await
    }

    pub async fn find_entity_by_name(
        &self,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<Entity>, StorageError> {
        self.search().find_entity_by_name(name, entity_type).await
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StorageError> {
        self.db().get_entity(id).await
    }

    pub async fn normalize_name(&self, raw_name: &str, language: Language) -> String {
        self.scraping().normalize_name(raw_name, language).await
    }

    pub async fn extract_data(&self, source: &str, fields: &[&str]) -> Result<Value, StorageError> {
        self.scraping().extract_data(source, fields).await
    }
}
