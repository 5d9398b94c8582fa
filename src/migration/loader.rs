use super::Migration;
use super::registry::{MigrationScript, ScriptRegistry, Symbol};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, error};

/// Entry point looked up when the manifest does not name one.
pub const DEFAULT_ENTRY_POINT: &str = "migrate";

lazy_static! {
    /// Modules in the middle of being loaded, process-wide.
    static ref LOADING_MODULES: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Migration script not found: {}", .path.display())]
    ScriptNotFound { path: PathBuf },

    #[error(
        "Syntax error in migration script {migration}:\n  File: {}\n  Line {line}: {text}\n  {}^\n  {message}",
        .file.display(),
        " ".repeat(.column.saturating_sub(1))
    )]
    ScriptSyntaxError {
        migration: String,
        file: PathBuf,
        line: usize,
        column: usize,
        text: String,
        message: String,
    },

    #[error("Invalid migration script {migration}: {message}")]
    ScriptStructureError { migration: String, message: String },

    #[error(
        "Migration script {migration} is missing required metadata: {}",
        .missing.join(", ")
    )]
    ScriptMetadataError {
        migration: String,
        missing: Vec<&'static str>,
    },

    #[error("Failed to read migration script {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Metadata every script must declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMetadata {
    pub author: String,
    pub date: String,
    pub description: String,
    /// SHA-256 of the manifest bytes
    pub checksum: String,
}

impl ScriptMetadata {
    /// `DATE` as a calendar date, if it is ISO formatted.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").ok()
    }
}

pub struct LoadedScript {
    pub entry_point: Arc<dyn MigrationScript>,
    pub metadata: ScriptMetadata,
}

/// Holds a module key in [`LOADING_MODULES`] until dropped.
struct LoadGuard {
    key: String,
}

impl LoadGuard {
    fn acquire(key: String, migration: &Migration) -> Result<Self, LoadError> {
        let mut loading = LOADING_MODULES.lock();
        if !loading.insert(key.clone()) {
            return Err(LoadError::ScriptStructureError {
                migration: migration.name.clone(),
                message: format!("module {} is already being loaded", key),
            });
        }
        Ok(Self { key })
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        LOADING_MODULES.lock().remove(&self.key);
    }
}

/// True while a module key is registered by an in-progress load.
pub fn is_loading(module_key: &str) -> bool {
    LOADING_MODULES.lock().contains(module_key)
}

/// Resolves a migration descriptor into a runnable entry point plus metadata.
pub struct ScriptLoader {
    registry: Arc<ScriptRegistry>,
    attempts: AtomicUsize,
}

impl ScriptLoader {
    pub fn new(registry: ScriptRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    /// Number of `load` calls made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Process-unique module key for a migration.
    pub fn module_key(migration: &Migration) -> String {
        format!("migration_{}", migration.name.replace('-', "_"))
    }

    pub fn load(&self, migration: &Migration) -> Result<LoadedScript, LoadError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        debug!("Loading script for migration {}", migration.name);

        let script_path = &migration.script_path;
        if !script_path.is_file() {
            return Err(LoadError::ScriptNotFound {
                path: script_path.clone(),
            });
        }

        let source = std::fs::read_to_string(script_path).map_err(|source| LoadError::Io {
            path: script_path.clone(),
            source,
        })?;

        let _guard = LoadGuard::acquire(Self::module_key(migration), migration)?;

        let manifest = parse_manifest(migration, &source).inspect_err(|e| error!("{}", e))?;
        let entry_point = self.resolve_entry_point(migration, &manifest)?;

        let mut metadata = validate_metadata(migration, &manifest)?;
        metadata.checksum = format!("{:x}", Sha256::digest(source.as_bytes()));

        debug!(
            "Validated migration script {}: author={}, date={}",
            migration.name, metadata.author, metadata.date
        );
        Ok(LoadedScript {
            entry_point,
            metadata,
        })
    }

    fn resolve_entry_point(
        &self,
        migration: &Migration,
        manifest: &Map<String, Value>,
    ) -> Result<Arc<dyn MigrationScript>, LoadError> {
        let structure_error = |message: String| LoadError::ScriptStructureError {
            migration: migration.name.clone(),
            message,
        };

        let entry_name = match manifest.get("ENTRY_POINT") {
            None => DEFAULT_ENTRY_POINT,
            Some(Value::String(name)) if !name.trim().is_empty() => name.as_str(),
            Some(other) => {
                return Err(structure_error(format!(
                    "ENTRY_POINT must name a function, got {}",
                    other
                )));
            }
        };

        let symbol = self
            .registry
            .module(&migration.name)
            .and_then(|module| module.get(entry_name))
            .ok_or_else(|| {
                structure_error(format!("script must define a '{}()' function", entry_name))
            })?;

        match symbol {
            Symbol::Async(script) => Ok(Arc::clone(script)),
            Symbol::Blocking(_) => Err(structure_error(format!(
                "'{}()' must be async (implement MigrationScript or return a future)",
                entry_name
            ))),
            Symbol::Value(_) => Err(structure_error(format!(
                "'{}' must be a callable function",
                entry_name
            ))),
        }
    }
}

fn parse_manifest(migration: &Migration, source: &str) -> Result<Map<String, Value>, LoadError> {
    match serde_json::from_str::<Value>(source) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(LoadError::ScriptStructureError {
            migration: migration.name.clone(),
            message: format!("script must be a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => {
            let line = e.line();
            let text = source
                .lines()
                .nth(line.saturating_sub(1))
                .unwrap_or_default()
                .to_string();
            // serde_json appends " at line L column C" to the message
            let message = e.to_string();
            let message = match message.rfind(" at line ") {
                Some(pos) => message[..pos].to_string(),
                None => message,
            };
            Err(LoadError::ScriptSyntaxError {
                migration: migration.name.clone(),
                file: migration.script_path.clone(),
                line,
                column: e.column(),
                text,
                message,
            })
        }
    }
}

fn validate_metadata(
    migration: &Migration,
    manifest: &Map<String, Value>,
) -> Result<ScriptMetadata, LoadError> {
    let field = |key: &str| {
        manifest
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let author = field("AUTHOR");
    let date = field("DATE");
    let description = field("DESCRIPTION");

    match (author, date, description) {
        (Some(author), Some(date), Some(description)) => Ok(ScriptMetadata {
            author,
            date,
            description,
            checksum: String::new(),
        }),
        (author, date, description) => {
            let missing = [("AUTHOR", author), ("DATE", date), ("DESCRIPTION", description)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(name, _)| name)
                .collect();
            Err(LoadError::ScriptMetadataError {
                migration: migration.name.clone(),
                missing,
            })
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
