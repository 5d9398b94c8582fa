use crate::migration::runner::{GIT_DIFF_CHECK_DISABLED_ENV, RunnerConfig};
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "nes-migrate")]
#[command(about = "nes-migrate - apply one-way data migrations to the entity database", long_about = None)]
pub struct Config {
    #[arg(long, default_value = "nes-db/v2", env = "NES_DB_PATH", help = "Root directory of the entity database")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "migrations", env = "NES_MIGRATIONS_DIR", help = "Directory holding NNN-name migration folders")]
    pub migrations_dir: PathBuf,

    #[arg(long, default_value = "info", env = "NES_LOG_LEVEL")]
    pub log_level: String,

    #[arg(
        long,
        env = GIT_DIFF_CHECK_DISABLED_ENV,
        value_parser = BoolishValueParser::new(),
        help = "Skip the uncommitted-changes check (test environments only)"
    )]
    pub skip_git_check: bool,

    #[arg(long, default_value = "30", env = "NES_GIT_TIMEOUT_SECS", help = "Timeout for each git command in seconds")]
    pub git_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List every migration and whether it has been applied
    List,

    /// List migrations that have not been applied yet
    Pending,

    /// Apply one migration, or every migration in order
    ///
    /// Each applied migration writes records into the database directory. In a
    /// git-backed database the next migration then sees uncommitted changes and
    /// is refused, so a batch stops after its first migration unless `--commit`
    /// is given or the records are committed between runs.
    Run {
        /// Folder name of a single migration to run
        name: Option<String>,

        #[arg(long, help = "Keep going after a failed migration")]
        continue_on_failure: bool,

        #[arg(
            long,
            help = "Commit the database after each applied migration (needed to apply several in one run)"
        )]
        commit: bool,
    },

    /// Print the stored record of an applied migration
    Show { name: String },

    /// Scaffold a new migration folder with the next free prefix
    Create {
        /// Lowercase words joined by '-', e.g. `ward-name-fix`
        slug: String,

        #[arg(long)]
        author: String,

        #[arg(long)]
        description: String,
    },
}

impl Config {
    /// Get a configuration instance with all values resolved from CLI args and environment variables
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn runner_config(&self, commit_after_apply: bool) -> RunnerConfig {
        RunnerConfig {
            skip_preflight: self.skip_git_check,
            commit_after_apply,
        }
    }
}
