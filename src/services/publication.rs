use super::PublicationService;
use crate::storage::{Entity, EntityDatabase, FileDatabase, Relationship, StorageError, Version};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
}

/// Publication service writing straight to a [`FileDatabase`].
///
/// Each create/update bumps the record's version number and persists a
/// [`Version`] snapshot next to it.
pub struct Publisher {
    db: Arc<FileDatabase>,
}

impl Publisher {
    pub fn new(db: Arc<FileDatabase>) -> Self {
        Self { db }
    }

    async fn publish_version(
        &self,
        subject_id: &str,
        version_number: u32,
        snapshot: serde_json::Value,
        author_id: &str,
        change_description: &str,
    ) -> Result<(), StorageError> {
        let version = Version {
            id: Version::make_id(subject_id, version_number),
            subject_id: subject_id.to_string(),
            version_number,
            author_id: author_id.to_string(),
            change_description: change_description.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            snapshot,
        };
        self.db.put_version(&version).await?;
        debug!("Published {}", version.id);
        Ok(())
    }
}

fn check_attribution(author_id: &str, change_description: &str) -> Result<(), StorageError> {
    if author_id.trim().is_empty() {
        return Err(StorageError::Invalid("author_id is required".to_string()));
    }
    if change_description.trim().is_empty() {
        return Err(StorageError::Invalid("change_description is required".to_string()));
    }
    Ok(())
}

#[async_trait]
impl PublicationService for Publisher {
    async fn create_entity(
        &self,
        mut entity: Entity,
        author_id: &str,
        change_description: &str,
    ) -> Result<Entity, StorageError> {
        check_attribution(author_id, change_description)?;
        if !SLUG_REGEX.is_match(&entity.slug) {
            return Err(StorageError::Invalid(format!("invalid slug: {:?}", entity.slug)));
        }
        if entity.names.is_empty() {
            return Err(StorageError::Invalid(format!("entity {} has no names", entity.slug)));
        }

        entity.id = Entity::make_id(entity.entity_type, &entity.slug);
        if self.db.get_entity(&entity.id).await?.is_some() {
            return Err(StorageError::Conflict(entity.id));
        }

        entity.version = 1;
        self.db.put_entity(&entity).await?;
        self.publish_version(&entity.id, 1, serde_json::to_value(&entity)?, author_id, change_description)
            .await?;
        Ok(entity)
    }

    async fn update_entity(
        &self,
        mut entity: Entity,
        author_id: &str,
        change_description: &str,
    ) -> Result<Entity, StorageError> {
        check_attribution(author_id, change_description)?;
        let id = Entity::make_id(entity.entity_type, &entity.slug);
        let current = self
            .db
            .get_entity(&id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;

        entity.id = id;
        entity.version = current.version + 1;
        self.db.put_entity(&entity).await?;
        self.publish_version(
            &entity.id,
            entity.version,
            serde_json::to_value(&entity)?,
            author_id,
            change_description,
        )
        .await?;
        Ok(entity)
    }

    async fn create_relationship(
        &self,
        mut relationship: Relationship,
        author_id: &str,
        change_description: &str,
    ) -> Result<Relationship, StorageError> {
        check_attribution(author_id, change_description)?;
        for endpoint in [&relationship.source_entity_id, &relationship.target_entity_id] {
            if self.db.get_entity(endpoint).await?.is_none() {
                return Err(StorageError::NotFound(endpoint.clone()));
            }
        }

        relationship.id = Relationship::make_id(
            &relationship.source_entity_id,
            &relationship.target_entity_id,
            &relationship.relationship_type,
        );
        if self.db.get_relationship(&relationship.id).await?.is_some() {
            return Err(StorageError::Conflict(relationship.id));
        }

        relationship.version = 1;
        self.db.put_relationship(&relationship).await?;
        self.publish_version(
            &relationship.id,
            1,
            serde_json::to_value(&relationship)?,
            author_id,
            change_description,
        )
        .await?;
        Ok(relationship)
    }

    async fn update_relationship(
        &self,
        mut relationship: Relationship,
        author_id: &str,
        change_description: &str,
    ) -> Result<Relationship, StorageError> {
        check_attribution(author_id, change_description)?;
        let id = Relationship::make_id(
            &relationship.source_entity_id,
            &relationship.target_entity_id,
            &relationship.relationship_type,
        );
        let current = self
            .db
            .get_relationship(&id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;

        relationship.id = id;
        relationship.version = current.version + 1;
        self.db.put_relationship(&relationship).await?;
        self.publish_version(
            &relationship.id,
            relationship.version,
            serde_json::to_value(&relationship)?,
            author_id,
            change_description,
        )
        .await?;
        Ok(relationship)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_validation() {
        assert!(SLUG_REGEX.is_match("bp-koirala"));
        assert!(SLUG_REGEX.is_match("ward-12"));
        assert!(!SLUG_REGEX.is_match("BP-Koirala"));
        assert!(!SLUG_REGEX.is_match("double--dash"));
        assert!(!SLUG_REGEX.is_match("../escape"));
    }

    #[test]
    fn test_attribution_required() {
        assert!(check_attribution("author:system", "Create entity").is_ok());
        assert!(check_attribution(" ", "Create entity").is_err());
        assert!(check_attribution("author:system", "").is_err());
    }
}
