//! # fregata
//!
//! Database to database migration orchestration with foreign key
//! preservation.
//!
//! A migration is a graph of migrators, each copying one entity from a
//! source connection to a target connection, surrounded by before and
//! after tasks. This library provides:
//!
//! - **Dependency ordering** of migrators, with cycle detection
//! - **Foreign key preservation** when the target regenerates primary keys:
//!   shadow columns carry the old keys through the copy and a bulk UPDATE
//!   relinks every relationship afterwards
//! - **Drivers** for MySQL, PostgreSQL, SQL Server and SQLite
//! - **YAML configuration** with migration inheritance
//!
//! ## Example
//!
//! ```rust,no_run
//! use fregata::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> fregata::Result<()> {
//!     let config = Config::load("fregata.yaml")?;
//!     let handles = config.connection_handles();
//!     let registry = config.registry(&handles)?;
//!
//!     let result = Orchestrator::new(registry.context("shop")?).run().await?;
//!     println!("Migrated {} items", result.items_total);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod foreign_key;
pub mod migration;
pub mod migrator;
pub mod orchestrator;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, MigrationDefinition, MigratorConfig};
pub use core::{Column, Connection, Dialect, ForeignKeyConstraint, Platform, Row, SqlValue};
pub use drivers::{connect, ConnectionHandle};
pub use error::{MigrateError, Result};
pub use foreign_key::{ForeignKey, ForeignKeyAfterTask, ForeignKeyBeforeTask, HasForeignKeys};
pub use migration::{Migration, MigrationContext, MigrationRegistry, SqlTask, Task};
pub use migrator::{Executor, Migrator, MigratorId, Puller, Pusher, TableMigrator};
pub use orchestrator::{MigrationResult, Orchestrator, ProgressEvent};
