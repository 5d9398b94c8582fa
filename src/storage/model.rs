use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Location,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Person, EntityType::Organization, EntityType::Location];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "person" => Ok(EntityType::Person),
            "organization" => Ok(EntityType::Organization),
            "location" => Ok(EntityType::Location),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NameKind {
    Primary,
    Alias,
    Alternate,
    Common,
    BirthName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameParts {
    pub full: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

impl NameParts {
    pub fn full(full: impl Into<String>) -> Self {
        Self {
            full: full.into(),
            ..Default::default()
        }
    }
}

/// A name in English and/or Nepali. At least one language must be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub kind: NameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<NameParts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ne: Option<NameParts>,
}

impl Name {
    pub fn primary(en: impl Into<String>) -> Self {
        Self {
            kind: NameKind::Primary,
            en: Some(NameParts::full(en)),
            ne: None,
        }
    }

    pub fn with_ne(mut self, ne: impl Into<String>) -> Self {
        self.ne = Some(NameParts::full(ne));
        self
    }

    fn texts(&self) -> impl Iterator<Item = &str> {
        self.en.iter().chain(self.ne.iter()).map(|parts| parts.full.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub id: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    pub names: Vec<Name>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub version: u32,
}

impl Entity {
    pub fn new(slug: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: String::new(),
            slug: slug.into(),
            entity_type,
            sub_type: None,
            names: Vec::new(),
            attributes: Map::new(),
            version: 0,
        }
    }

    pub fn make_id(entity_type: EntityType, slug: &str) -> String {
        format!("entity:{}/{}", entity_type, slug)
    }

    /// Splits `entity:<type>/<slug>` into its parts.
    pub fn parse_id(id: &str) -> Option<(EntityType, &str)> {
        let rest = id.strip_prefix("entity:")?;
        let (ty, slug) = rest.split_once('/')?;
        if slug.is_empty() || slug.contains('/') {
            return None;
        }
        Some((ty.parse().ok()?, slug))
    }

    pub fn with_name(mut self, name: Name) -> Self {
        self.names.push(name);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.kind == NameKind::Primary)
            .or_else(|| self.names.first())
            .and_then(|n| n.texts().next())
    }

    pub fn has_name(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.names
            .iter()
            .flat_map(|n| n.texts())
            .any(|text| text.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub version: u32,
}

impl Relationship {
    pub fn new(
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            relationship_type: relationship_type.into(),
            attributes: Map::new(),
            version: 0,
        }
    }

    pub fn make_id(source: &str, target: &str, relationship_type: &str) -> String {
        format!("relationship:{}:{}:{}", source, target, relationship_type)
    }
}

/// Persisted snapshot of an entity or relationship at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub subject_id: String,
    pub version_number: u32,
    pub author_id: String,
    pub change_description: String,
    pub created_at: String,
    pub snapshot: Value,
}

impl Version {
    pub fn make_id(subject_id: &str, version_number: u32) -> String {
        format!("version:{}:{}", subject_id, version_number)
    }
}

/// Filter over entities. Empty query matches everything.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    pub entity_type: Option<EntityType>,
    pub sub_type: Option<String>,
    pub text: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl EntityQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(ty) = self.entity_type {
            if entity.entity_type != ty {
                return false;
            }
        }
        if let Some(sub_type) = &self.sub_type {
            if entity.sub_type.as_deref() != Some(sub_type.as_str()) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !entity.has_name(text) && !entity.slug.contains(text.as_str()) {
                return false;
            }
        }
        self.attributes
            .iter()
            .all(|(key, value)| entity.attributes.get(key) == Some(value))
    }

    /// Applies offset and limit to an already filtered, ordered list.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
