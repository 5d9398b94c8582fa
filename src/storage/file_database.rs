use super::model::{Entity, EntityQuery, EntityType, Relationship, Version};
use super::{EntityDatabase, StorageError};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const ENTITY_DIR: &str = "entity";
const RELATIONSHIP_DIR: &str = "relationship";
pub const VERSION_DIR: &str = "version";

/// Entity database stored as one JSON document per record.
///
/// Layout under the root:
/// - `entity/<type>/<slug>.json`
/// - `relationship/<flattened id>.json`
/// - `version/entity/<type>/<slug>/<n>.json`, `version/relationship/<flattened id>/<n>.json`
pub struct FileDatabase {
    root: PathBuf,
}

impl FileDatabase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the database, creating the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let db = Self::new(root);
        fs::create_dir_all(&db.root).await?;
        debug!("Opened file database at {}", db.root.display());
        Ok(db)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self) -> PathBuf {
        self.root.join(VERSION_DIR)
    }

    fn entity_path(&self, entity_type: EntityType, slug: &str) -> PathBuf {
        self.root
            .join(ENTITY_DIR)
            .join(entity_type.as_str())
            .join(format!("{}.json", slug))
    }

    fn relationship_path(&self, id: &str) -> PathBuf {
        self.root
            .join(RELATIONSHIP_DIR)
            .join(format!("{}.json", flatten_id(id)))
    }

    fn version_path(&self, subject_id: &str, version_number: u32) -> Result<PathBuf, StorageError> {
        let dir = if let Some((ty, slug)) = Entity::parse_id(subject_id) {
            self.version_dir().join(ENTITY_DIR).join(ty.as_str()).join(slug)
        } else if subject_id.starts_with("relationship:") {
            self.version_dir().join(RELATIONSHIP_DIR).join(flatten_id(subject_id))
        } else {
            return Err(StorageError::Invalid(format!(
                "cannot version unknown subject: {}",
                subject_id
            )));
        };
        Ok(dir.join(format!("{}.json", version_number)))
    }

    pub async fn put_entity(&self, entity: &Entity) -> Result<(), StorageError> {
        let expected = Entity::make_id(entity.entity_type, &entity.slug);
        if entity.id != expected {
            return Err(StorageError::Invalid(format!(
                "entity id {} does not match {}",
                entity.id, expected
            )));
        }
        write_document(&self.entity_path(entity.entity_type, &entity.slug), entity).await
    }

    pub async fn put_relationship(&self, relationship: &Relationship) -> Result<(), StorageError> {
        if relationship.id.is_empty() {
            return Err(StorageError::Invalid("relationship id is empty".to_string()));
        }
        write_document(&self.relationship_path(&relationship.id), relationship).await
    }

    pub async fn put_version(&self, version: &Version) -> Result<(), StorageError> {
        let path = self.version_path(&version.subject_id, version.version_number)?;
        write_document(&path, version).await
    }

    pub async fn get_version(
        &self,
        subject_id: &str,
        version_number: u32,
    ) -> Result<Option<Version>, StorageError> {
        let path = self.version_path(subject_id, version_number)?;
        read_document(&path).await
    }
}

#[async_trait]
impl EntityDatabase for FileDatabase {
    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StorageError> {
        match Entity::parse_id(id) {
            Some((ty, slug)) => read_document(&self.entity_path(ty, slug)).await,
            None => Ok(None),
        }
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>, StorageError> {
        let types: Vec<EntityType> = match query.entity_type {
            Some(ty) => vec![ty],
            None => EntityType::ALL.to_vec(),
        };

        let mut matched = Vec::new();
        for ty in types {
            let dir = self.root.join(ENTITY_DIR).join(ty.as_str());
            for path in json_files(&dir).await? {
                if let Some(entity) = read_document::<Entity>(&path).await? {
                    if query.matches(&entity) {
                        matched.push(entity);
                    }
                }
            }
        }
        Ok(query.paginate(matched))
    }

    async fn count_entities(&self) -> Result<usize, StorageError> {
        let mut count = 0;
        for ty in EntityType::ALL {
            count += json_files(&self.root.join(ENTITY_DIR).join(ty.as_str())).await?.len();
        }
        Ok(count)
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>, StorageError> {
        read_document(&self.relationship_path(id)).await
    }

    async fn list_relationships(&self, limit: Option<usize>) -> Result<Vec<Relationship>, StorageError> {
        let mut relationships = Vec::new();
        for path in json_files(&self.root.join(RELATIONSHIP_DIR)).await? {
            if limit.is_some_and(|limit| relationships.len() >= limit) {
                break;
            }
            if let Some(relationship) = read_document(&path).await? {
                relationships.push(relationship);
            }
        }
        Ok(relationships)
    }

    async fn count_relationships(&self) -> Result<usize, StorageError> {
        Ok(json_files(&self.root.join(RELATIONSHIP_DIR)).await?.len())
    }
}

/// Relationship ids contain `:` and `/`; flatten them into a single file name.
fn flatten_id(id: &str) -> String {
    id.replace(':', "__").replace('/', "_")
}

/// Sorted `.json` files directly inside `dir`. A missing directory is empty.
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_id() {
        assert_eq!(
            flatten_id("relationship:entity:person/a:entity:organization/b:MEMBER_OF"),
            "relationship__entity__person_a__entity__organization_b__MEMBER_OF"
        );
    }
}
