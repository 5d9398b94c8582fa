use crate::migration::MigrationContext;
use crate::storage::{Entity, EntityType, Name, NameKind, NameParts};
use futures::future::BoxFuture;

pub const NAME: &str = "000-example-migration";

const AUTHOR_ID: &str = "author:migration:000-example-migration";

/// Create the first entity in the database: Bishweshwar Prasad Koirala.
pub fn migrate(ctx: &MigrationContext) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        ctx.log("Starting migration: Creating BP Koirala entity");

        let bp_koirala = Entity::new("bishweshwar-prasad-koirala", EntityType::Person)
            .with_name(Name {
                kind: NameKind::Primary,
                en: Some(NameParts {
                    full: "Bishweshwar Prasad Koirala".to_string(),
                    given: Some("Bishweshwar Prasad".to_string()),
                    family: Some("Koirala".to_string()),
                }),
                ne: Some(NameParts::full("विश्वेश्वर प्रसाद कोइराला")),
            })
            .with_name(Name {
                kind: NameKind::Common,
                en: Some(NameParts::full("BP Koirala")),
                ne: Some(NameParts::full("बी पी कोइराला")),
            });

        let created = ctx
            .create_entity(bp_koirala, AUTHOR_ID, "Initial migration: Create BP Koirala entity")
            .await?;

        ctx.log(format!("Created entity: {}", created.slug));
        ctx.log("Migration completed successfully");
        Ok(())
    })
}
