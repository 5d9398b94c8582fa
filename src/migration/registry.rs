use super::context::MigrationContext;
use super::scripts;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Async entry point written as a plain function.
pub type AsyncEntryFn = for<'a> fn(&'a MigrationContext) -> BoxFuture<'a, anyhow::Result<()>>;

/// Entry point with a blocking calling convention. Can be registered, but the
/// loader refuses to run it.
pub type BlockingEntryFn = fn(&MigrationContext) -> anyhow::Result<()>;

/// The executable part of a migration.
#[async_trait]
pub trait MigrationScript: Send + Sync {
    async fn migrate(&self, ctx: &MigrationContext) -> anyhow::Result<()>;
}

struct FnScript(AsyncEntryFn);

#[async_trait]
impl MigrationScript for FnScript {
    async fn migrate(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// A named item exported by a script module.
#[derive(Clone)]
pub enum Symbol {
    Async(Arc<dyn MigrationScript>),
    Blocking(BlockingEntryFn),
    Value(Value),
}

impl Symbol {
    pub fn kind(&self) -> &'static str {
        match self {
            Symbol::Async(_) => "async function",
            Symbol::Blocking(_) => "function",
            Symbol::Value(_) => "value",
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Value(value) => write!(f, "Value({})", value),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Symbol table for one migration.
#[derive(Clone, Debug, Default)]
pub struct ScriptModule {
    symbols: BTreeMap<String, Symbol>,
}

impl ScriptModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, name: &str, script: impl MigrationScript + 'static) -> Self {
        self.symbols.insert(name.to_string(), Symbol::Async(Arc::new(script)));
        self
    }

    pub fn with_fn(mut self, name: &str, entry: AsyncEntryFn) -> Self {
        self.symbols.insert(name.to_string(), Symbol::Async(Arc::new(FnScript(entry))));
        self
    }

    pub fn with_blocking(mut self, name: &str, entry: BlockingEntryFn) -> Self {
        self.symbols.insert(name.to_string(), Symbol::Blocking(entry));
        self
    }

    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.symbols.insert(name.to_string(), Symbol::Value(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }
}

/// Script modules keyed by migration name.
#[derive(Clone, Debug, Default)]
pub struct ScriptRegistry {
    modules: BTreeMap<String, ScriptModule>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the module for a migration.
    pub fn register(&mut self, migration_name: &str, module: ScriptModule) -> &mut Self {
        self.modules.insert(migration_name.to_string(), module);
        self
    }

    /// Shorthand for a module exporting a single async `migrate` function.
    pub fn register_fn(&mut self, migration_name: &str, entry: AsyncEntryFn) -> &mut Self {
        self.register(migration_name, ScriptModule::new().with_fn("migrate", entry))
    }

    pub fn register_script(
        &mut self,
        migration_name: &str,
        script: impl MigrationScript + 'static,
    ) -> &mut Self {
        self.register(migration_name, ScriptModule::new().with_script("migrate", script))
    }

    pub fn module(&self, migration_name: &str) -> Option<&ScriptModule> {
        self.modules.get(migration_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Registry holding every migration shipped with this crate.
pub fn builtin_registry() -> ScriptRegistry {
    let mut registry = ScriptRegistry::new();
    scripts::register_all(&mut registry);
    registry
}
