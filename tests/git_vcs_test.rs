mod common;

use common::manifest;
use futures::future::BoxFuture;
use nes_migrate::migration::vcs::DEFAULT_GIT_TIMEOUT;
use nes_migrate::migration::{
    GitCli, Migration, MigrationContext, MigrationError, MigrationLogStore, MigrationRunner,
    MigrationStatus, RunnerConfig, ScriptRegistry, VcsError, VersionControl,
};
use nes_migrate::storage::{Entity, EntityType, Name};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// A repository with one committed README.
fn init_repo(repo: &Path) {
    std::fs::create_dir_all(repo).unwrap();
    git(repo, &["init", "-q"]);
    git(repo, &["config", "user.name", "Migration Tests"]);
    git(repo, &["config", "user.email", "tests@nepalentity.org"]);
    git(repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join("README"), "entity database\n").unwrap();
    git(repo, &["add", "README"]);
    git(repo, &["commit", "-q", "-m", "initial"]);
}

#[tokio::test]
async fn test_clean_tree_has_no_diff() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let vcs = GitCli::new(dir.path(), DEFAULT_GIT_TIMEOUT);

    assert!(vcs.is_repository());
    assert_eq!(vcs.diff().await.unwrap(), None);
}

#[tokio::test]
async fn test_diff_includes_tracked_and_untracked_changes() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    std::fs::write(dir.path().join("README"), "entity database\nsecond line\n").unwrap();
    let person_dir = dir.path().join("v2/entity/person");
    std::fs::create_dir_all(&person_dir).unwrap();
    std::fs::write(person_dir.join("ram-sharma.json"), "{\n  \"slug\": \"ram-sharma\"\n}\n").unwrap();

    let vcs = GitCli::new(dir.path(), DEFAULT_GIT_TIMEOUT);
    let diff = vcs.diff().await.unwrap().unwrap();

    assert!(diff.contains("diff --git a/README b/README"), "{}", diff);
    assert!(diff.contains("+second line"), "{}", diff);
    assert!(diff.contains(
        "diff --git a/v2/entity/person/ram-sharma.json b/v2/entity/person/ram-sharma.json\n\
         new file mode 100644"
    ));
    assert!(diff.contains("+  \"slug\": \"ram-sharma\""));
}

#[tokio::test]
async fn test_binary_untracked_file_listed_without_content() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    std::fs::write(dir.path().join("photo.bin"), [0xff_u8, 0xfe, 0x00, 0x81]).unwrap();

    let vcs = GitCli::new(dir.path(), DEFAULT_GIT_TIMEOUT);
    let diff = vcs.diff().await.unwrap().unwrap();
    assert!(diff.contains("Binary files /dev/null and b/photo.bin differ"), "{}", diff);
    assert!(!diff.contains("@@ -0,0 +1,0 @@"));
}

#[tokio::test]
async fn test_commit_leaves_clean_tree() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    std::fs::write(dir.path().join("notes.txt"), "ward 7\n").unwrap();

    let vcs = GitCli::new(dir.path(), DEFAULT_GIT_TIMEOUT);
    vcs.commit("Migration: 001-notes\n\nAdd notes").await.unwrap();

    assert_eq!(vcs.diff().await.unwrap(), None);
    let subject = git(dir.path(), &["log", "-1", "--format=%s"]);
    assert_eq!(subject.trim(), "Migration: 001-notes");
}

#[tokio::test]
async fn test_zero_timeout_times_out() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());

    let vcs = GitCli::new(dir.path(), Duration::ZERO);
    let err = vcs.diff().await.unwrap_err();
    assert!(matches!(err, VcsError::Timeout { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_outside_repository() {
    let dir = TempDir::new().unwrap();
    let vcs = GitCli::new(dir.path(), DEFAULT_GIT_TIMEOUT);
    assert!(matches!(vcs.diff().await, Err(VcsError::NotARepository(_))));
    assert!(matches!(vcs.commit("nothing").await, Err(VcsError::NotARepository(_))));
}

fn create_person(ctx: &MigrationContext) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let folder = ctx.migration_dir().file_name().unwrap().to_string_lossy();
        let slug = format!("person-{}", &folder[..3]);
        ctx.create_entity(
            Entity::new(&slug, EntityType::Person).with_name(Name::primary("Git Person")),
            "author:migration:test",
            "Add person",
        )
        .await?;
        Ok(())
    })
}

fn write_migration(root: &Path, name: &str) -> Migration {
    let folder = root.join(name);
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(
        folder.join("migrate.json"),
        manifest("Test Author", "2025-01-15", &format!("Git migration {}", name)),
    )
    .unwrap();
    Migration::from_folder(folder).unwrap()
}

async fn run_pair(commit_after_apply: bool) -> (TempDir, Vec<MigrationStatus>, Option<String>) {
    let dir = TempDir::new().unwrap();
    let repo = dir.path().join("nes-db");
    init_repo(&repo);
    let migrations = vec![
        write_migration(&dir.path().join("migrations"), "001-git-first"),
        write_migration(&dir.path().join("migrations"), "002-git-second"),
    ];

    let mut registry = ScriptRegistry::new();
    registry
        .register_fn("001-git-first", create_person)
        .register_fn("002-git-second", create_person);
    let config = RunnerConfig {
        commit_after_apply,
        ..RunnerConfig::default()
    };
    let runner = MigrationRunner::open(&repo.join("v2"), registry, config, DEFAULT_GIT_TIMEOUT)
        .await
        .unwrap();

    let results = runner.run_migrations(&migrations, true).await;
    let statuses = results.iter().map(|r| r.status).collect();
    let error = results
        .iter()
        .find_map(|r| r.error.as_ref())
        .map(|e| {
            assert!(matches!(e, MigrationError::DirtyTree { .. }), "{:?}", e);
            e.to_string()
        });

    let first = runner.log_store().read("001-git-first").await.unwrap().unwrap();
    assert!(first.changes.has_diff);
    (dir, statuses, error)
}

#[tokio::test]
async fn test_runner_records_real_diff_and_commits() {
    let (dir, statuses, error) = run_pair(true).await;
    assert_eq!(statuses, vec![MigrationStatus::Completed, MigrationStatus::Completed]);
    assert_eq!(error, None);

    let repo = dir.path().join("nes-db");
    let diff = std::fs::read_to_string(repo.join("v2/migration-logs/001-git-first/changes.diff")).unwrap();
    assert!(diff.contains("v2/entity/person/person-001.json"), "{}", diff);
    let subjects = git(&repo, &["log", "--format=%s"]);
    assert_eq!(
        subjects.lines().collect::<Vec<_>>(),
        vec!["Migration: 002-git-second", "Migration: 001-git-first", "initial"]
    );
}

#[tokio::test]
async fn test_runner_without_commit_stops_at_dirty_tree() {
    let (_dir, statuses, error) = run_pair(false).await;
    assert_eq!(statuses, vec![MigrationStatus::Completed, MigrationStatus::Failed]);
    assert!(error.unwrap().contains("uncommitted changes"));
}
