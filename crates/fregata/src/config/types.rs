//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::platform::Platform;
use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connections, by name.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,

    /// Migrations, by name.
    #[serde(default)]
    pub migrations: BTreeMap<String, MigrationDefinition>,
}

/// One database connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Engine: mysql, postgres, mssql or sqlite (aliases accepted).
    pub r#type: String,

    /// Database host (network engines).
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (default: the engine's standard port).
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// TLS mode: disable, require, verify-ca or verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Database file for SQLite, `:memory:` for a private in-memory database.
    #[serde(default)]
    pub path: Option<String>,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl ConnectionConfig {
    /// Engine behind this connection.
    pub fn platform(&self) -> Result<Platform> {
        Platform::from_db_type(&self.r#type)
    }

    /// Configured port, or the engine's default one.
    pub fn port_or_default(&self) -> u16 {
        self.port
            .or_else(|| self.platform().ok().and_then(|p| p.default_port()))
            .unwrap_or(0)
    }

    /// Short `host:port/database` (or path) description for logs.
    pub fn describe(&self) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => format!("{}:{}/{}", self.host, self.port_or_default(), self.database),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            r#type: String::new(),
            host: default_host(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
            path: None,
            pool_size: default_pool_size(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("path", &self.path)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// One named migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationDefinition {
    /// Migration whose options, migrators and tasks come first.
    #[serde(default)]
    pub parent: Option<String>,

    /// Free-form options handed to tasks.
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,

    /// Table migrators.
    #[serde(default)]
    pub migrators: Vec<MigratorConfig>,

    /// Tasks around the migrators.
    #[serde(default)]
    pub tasks: TasksConfig,
}

/// Copy of one table between two connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Migrator name, unique within the migration.
    pub name: String,

    /// Connection rows are read from.
    pub source: String,

    /// Connection rows are written to.
    pub target: String,

    /// Table to read.
    pub source_table: String,

    /// Table to write (default: `source_table`).
    #[serde(default)]
    pub target_table: Option<String>,

    /// Columns to copy (default: all).
    #[serde(default)]
    pub columns: Vec<String>,

    /// Read order (default: the source primary key).
    #[serde(default)]
    pub order_by: Vec<String>,

    /// Rows per page (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Migrators that must run first.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Key columns the target generates anew. Their source values are kept
    /// in shadow columns so foreign keys can be relinked.
    #[serde(default)]
    pub regenerated_keys: Vec<String>,

    /// Relationships to preserve, declared by hand.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyConfig>,

    /// Also preserve the foreign keys the target table declares.
    #[serde(default)]
    pub introspect_foreign_keys: bool,

    /// Foreign key columns whose NOT NULL is lifted during the copy.
    #[serde(default)]
    pub allow_null: Vec<String>,
}

impl MigratorConfig {
    pub fn target_table(&self) -> &str {
        self.target_table.as_deref().unwrap_or(&self.source_table)
    }
}

/// A relationship declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Columns of the migrator's target table.
    pub columns: Vec<String>,

    /// Referenced table.
    pub foreign_table: String,

    /// Referenced columns, paired with `columns`.
    pub foreign_columns: Vec<String>,
}

/// Before and after task lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default)]
    pub before: Vec<TaskConfig>,

    #[serde(default)]
    pub after: Vec<TaskConfig>,
}

/// A task entry: a built-in name or a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskConfig {
    Builtin(BuiltinTask),
    Sql { connection: String, sql: String },
}

/// Tasks shipped with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTask {
    /// Foreign key preservation: shadow columns before, relinking after.
    ForeignKeys,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_batch_size() -> usize {
    1000
}
