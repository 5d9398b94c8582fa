pub mod config;
pub mod migration;
pub mod services;
pub mod storage;

pub use migration::{
    BatchSummary, Migration, MigrationError, MigrationResult, MigrationRunner, MigrationStatus,
};
