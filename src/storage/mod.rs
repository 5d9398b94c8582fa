// File-backed entity storage
pub mod file_database;
pub mod model;

use async_trait::async_trait;
use thiserror::Error;

pub use file_database::FileDatabase;
pub use model::{
    Entity, EntityQuery, EntityType, Language, Name, NameKind, NameParts, Relationship, Version,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Conflict(String),
    #[error("Invalid: {0}")]
    Invalid(String),
}

/// Read access to entities and relationships.
#[async_trait]
pub trait EntityDatabase: Send + Sync {
    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StorageError>;

    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>, StorageError>;

    async fn count_entities(&self) -> Result<usize, StorageError>;

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>, StorageError>;

    async fn list_relationships(&self, limit: Option<usize>) -> Result<Vec<Relationship>, StorageError>;

    async fn count_relationships(&self) -> Result<usize, StorageError>;

    /// Relationships where the entity is either endpoint.
    async fn get_relationships_for(&self, entity_id: &str) -> Result<Vec<Relationship>, StorageError> {
        let all = self.list_relationships(None).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.source_entity_id == entity_id || r.target_entity_id == entity_id)
            .collect())
    }
}
