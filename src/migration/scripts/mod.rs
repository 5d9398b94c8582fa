// Migrations compiled into the binary
mod example;

use super::registry::ScriptRegistry;

/// Register every built-in migration under its folder name.
pub fn register_all(registry: &mut ScriptRegistry) {
    registry.register_fn(example::NAME, example::migrate);
}
