// Capabilities handed to migration scripts through the context
pub mod publication;
pub mod scraping;
pub mod search;

use crate::storage::{Entity, EntityQuery, EntityType, Language, Relationship, StorageError};
use async_trait::async_trait;
use serde_json::Value;

pub use publication::Publisher;
pub use scraping::Scraper;
pub use search::DatabaseSearch;

/// Creates and updates versioned entities and relationships.
///
/// Every write is attributed to an author and carries a human-readable change
/// description, both of which end up in the version record.
#[async_trait]
pub trait PublicationService: Send + Sync {
    async fn create_entity(
        &self,
        entity: Entity,
        author_id: &str,
        change_description: &str,
    ) -> Result<Entity, StorageError>;

    async fn update_entity(
        &self,
        entity: Entity,
        author_id: &str,
        change_description: &str,
    ) -> Result<Entity, StorageError>;

    async fn create_relationship(
        &self,
        relationship: Relationship,
        author_id: &str,
        change_description: &str,
    ) -> Result<Relationship, StorageError>;

    async fn update_relationship(
        &self,
        relationship: Relationship,
        author_id: &str,
        change_description: &str,
    ) -> Result<Relationship, StorageError>;
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>, StorageError>;

    async fn find_entity_by_name(
        &self,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<Entity>, StorageError>;

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StorageError>;
}

#[async_trait]
pub trait ScrapingService: Send + Sync {
    async fn normalize_name(&self, raw_name: &str, language: Language) -> String;

    /// Pull the requested fields out of loosely structured `key: value` text.
    async fn extract_data(&self, source: &str, fields: &[&str]) -> Result<Value, StorageError>;
}
