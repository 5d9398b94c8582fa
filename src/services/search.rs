use super::SearchService;
use crate::storage::{Entity, EntityDatabase, EntityQuery, EntityType, StorageError};
use async_trait::async_trait;
use std::sync::Arc;

/// Search backed by a full scan of the entity database.
pub struct DatabaseSearch {
    db: Arc<dyn EntityDatabase>,
}

impl DatabaseSearch {
    pub fn new(db: Arc<dyn EntityDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SearchService for DatabaseSearch {
    async fn search_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>, StorageError> {
        self.db.list_entities(query).await
    }

    async fn find_entity_by_name(
        &self,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<Entity>, StorageError> {
        let mut query = EntityQuery::new().text(name);
        query.entity_type = entity_type;
        let candidates = self.db.list_entities(&query).await?;

        // Prefer an exact (case-insensitive) match over a substring hit
        let wanted = name.to_lowercase();
        let exact = candidates.iter().position(|e| {
            e.names.iter().any(|n| {
                n.en.iter()
                    .chain(n.ne.iter())
                    .any(|parts| parts.full.to_lowercase() == wanted)
            })
        });
        Ok(match exact {
            Some(index) => candidates.into_iter().nth(index),
            None => candidates.into_iter().next(),
        })
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StorageError> {
        self.db.get_entity(id).await
    }
}
