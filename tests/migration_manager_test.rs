mod common;

use common::TestEnv;
use futures::future::BoxFuture;
use nes_migrate::migration::{
    FileLogStore, ManagerError, Migration, MigrationContext, MigrationLogStore, MigrationManager,
    MigrationStatus, ScriptLoader, ScriptRegistry,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn noop(ctx: &MigrationContext) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        ctx.log("nothing to do");
        Ok(())
    })
}

fn manager(env: &TestEnv) -> MigrationManager {
    MigrationManager::new(&env.migrations_dir, env.log_store.clone())
}

fn names(migrations: &[Migration]) -> Vec<&str> {
    migrations.iter().map(|m| m.name.as_str()).collect()
}

#[tokio::test]
async fn test_discover_sorted_and_filtered() {
    let env = TestEnv::new().await;
    env.add_migration("010-later");
    env.add_migration("002-ward-name-fix");
    env.add_migration("000-example-migration");
    std::fs::create_dir_all(env.migrations_dir.join("Not-A-Migration")).unwrap();
    std::fs::create_dir_all(env.migrations_dir.join("__pycache__")).unwrap();
    std::fs::write(env.migrations_dir.join("003-a-file"), "").unwrap();

    let discovered = manager(&env).discover().unwrap();
    assert_eq!(
        names(&discovered),
        vec!["000-example-migration", "002-ward-name-fix", "010-later"]
    );
    assert_eq!(discovered[1].prefix, 2);
}

#[tokio::test]
async fn test_discover_missing_directory() {
    let env = TestEnv::new().await;
    let manager = MigrationManager::new(env.dir.path().join("nowhere"), env.log_store.clone());
    assert!(manager.discover().unwrap().is_empty());
}

#[tokio::test]
async fn test_pending_and_applied() {
    let env = TestEnv::new().await;
    let first = env.add_migration("300-manager-first");
    env.add_migration("301-manager-second");

    let mut registry = ScriptRegistry::new();
    registry.register_fn("300-manager-first", noop);
    let runner = env.runner(registry);
    assert_eq!(
        runner.run_migration(&first).await.status,
        MigrationStatus::Completed
    );

    let manager = manager(&env);
    assert_eq!(names(&manager.applied().await.unwrap()), vec!["300-manager-first"]);
    assert_eq!(names(&manager.pending().await.unwrap()), vec!["301-manager-second"]);
    assert_eq!(
        manager.find("301-manager-second").unwrap().map(|m| m.prefix),
        Some(301)
    );
    assert!(manager.find("999-absent").unwrap().is_none());
}

#[tokio::test]
async fn test_create_migration_scaffold() {
    let env = TestEnv::new().await;
    let manager = manager(&env);

    let first = manager
        .create_migration("ward-name-fix", "Damodar Dahal", "Fix ward names")
        .unwrap();
    assert_eq!(first.name, "000-ward-name-fix");
    assert!(first.folder().join("README.md").is_file());

    let second = manager
        .create_migration("source-2082-political-parties", "Damodar Dahal", "Import parties")
        .unwrap();
    assert_eq!(second.name, "001-source-2082-political-parties");

    // the scaffolded manifest passes validation once code is registered
    let mut registry = ScriptRegistry::new();
    registry.register_fn("001-source-2082-political-parties", noop);
    let loaded = ScriptLoader::new(registry).load(&second).unwrap();
    assert_eq!(loaded.metadata.author, "Damodar Dahal");
    assert_eq!(loaded.metadata.description, "Import parties");
    assert!(loaded.metadata.parsed_date().is_some());
}

#[tokio::test]
async fn test_create_migration_rejects_bad_slug() {
    let env = TestEnv::new().await;
    let manager = manager(&env);

    let err = manager
        .create_migration("Ward Name Fix", "a", "d")
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidName(_)));
    assert!(manager.discover().unwrap().is_empty());
}

#[tokio::test]
async fn test_log_store_list_and_stale_diff() {
    let env = TestEnv::new().await;
    let first = env.add_migration("310-store-first");
    let second = env.add_migration("311-store-second");

    // first run leaves a diff behind
    env.vcs.queue(None);
    env.vcs.queue(Some("diff --git a/x b/x"));
    let mut registry = ScriptRegistry::new();
    registry
        .register_fn("310-store-first", noop)
        .register_fn("311-store-second", noop);
    let runner = env.runner(registry);
    runner.run_migrations(&[first, second], true).await;

    let store = FileLogStore::for_database(&env.db_path);
    let logs = store.list().await.unwrap();
    let listed: Vec<&str> = logs.iter().map(|l| l.migration_name.as_str()).collect();
    assert_eq!(listed, vec!["310-store-first", "311-store-second"]);
    assert!(logs[0].changes.has_diff);
    assert!(!logs[1].changes.has_diff);
    assert!(store.log_dir("310-store-first").join("changes.diff").is_file());
    assert!(!store.log_dir("311-store-second").join("changes.diff").exists());
    assert!(store.read("312-store-never").await.unwrap().is_none());

    // a rewritten record without a diff drops the old diff file
    let result_migration = Migration::from_folder(env.migrations_dir.join("310-store-first")).unwrap();
    let loaded = ScriptLoader::new({
        let mut registry = ScriptRegistry::new();
        registry.register_fn("310-store-first", noop);
        registry
    })
    .load(&result_migration)
    .unwrap();
    let mut result = nes_migrate::MigrationResult::new(&result_migration);
    result.status = MigrationStatus::Completed;
    result.duration_seconds = Some(0.1);
    store.store(&result, &loaded.metadata, None).await.unwrap();
    assert!(!store.log_dir("310-store-first").join("changes.diff").exists());
    assert!(!store.read("310-store-first").await.unwrap().unwrap().changes.has_diff);
}

#[tokio::test]
async fn test_manager_uses_shared_store() {
    let env = TestEnv::new().await;
    let store: Arc<dyn MigrationLogStore> = Arc::new(FileLogStore::for_database(&env.db_path));
    let manager = MigrationManager::new(&env.migrations_dir, store);
    env.add_migration("320-shared");
    assert_eq!(names(&manager.pending().await.unwrap()), vec!["320-shared"]);
}
