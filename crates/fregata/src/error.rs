//! Error types for the migration library.

use thiserror::Error;

use crate::core::platform::Platform;

/// Exit code for configuration problems (bad YAML, missing fields).
pub const EXIT_CONFIG: u8 = 1;
/// Exit code for migration graph and precondition failures.
pub const EXIT_MIGRATION: u8 = 2;
/// Exit code for errors raised by a database.
pub const EXIT_DATABASE: u8 = 3;
/// Exit code when the run was cancelled.
pub const EXIT_CANCELLED: u8 = 4;
/// Exit code for file system errors.
pub const EXIT_IO: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The target platform cannot carry foreign key constraints.
    #[error(
        "The \"{platform}\" platform does not support foreign key constraints and is therefore \
         incompatible with the foreign key feature as you would lose your existing foreign key \
         constraints. Consider creating your own task to keep the relations."
    )]
    IncompatiblePlatform { platform: Platform },

    /// Two migrators with the same identity were added to one migration.
    #[error("A \"{migrator}\" migrator has already been registered.")]
    DuplicateMigrator { migrator: String },

    /// Two migrations were registered under the same name.
    #[error("A migration has already been registered with the name \"{name}\".")]
    DuplicateMigration { name: String },

    /// No migration is registered under the requested name.
    #[error("No migration registered with the name \"{0}\".")]
    UnknownMigration(String),

    /// Declared migrator dependencies form a cycle.
    #[error("Dependent migrator: circular dependency detected ({})", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// A migrator depends on a migrator that is not part of the migration.
    #[error("Dependent migrator: \"{migrator}\" depends on unknown migrator \"{dependency}\".")]
    UnknownDependency { migrator: String, dependency: String },

    /// A column named by a foreign key or migrator does not exist.
    #[error("Column {column} does not exist on table {table}")]
    MissingColumn { table: String, column: String },

    /// A generated identifier exceeds what the database accepts.
    #[error("Identifier {identifier} is {length} characters long, {platform} accepts at most {max}")]
    IdentifierTooLong {
        identifier: String,
        length: usize,
        max: usize,
        platform: Platform,
    },

    /// Operation not available on this connection.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// PostgreSQL error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL error
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// SQL Server error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a MissingColumn error
    pub fn missing_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        MigrateError::MissingColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::UnknownMigration(_) => {
                EXIT_CONFIG
            }
            MigrateError::IncompatiblePlatform { .. }
            | MigrateError::DuplicateMigrator { .. }
            | MigrateError::DuplicateMigration { .. }
            | MigrateError::CircularDependency { .. }
            | MigrateError::UnknownDependency { .. }
            | MigrateError::MissingColumn { .. }
            | MigrateError::IdentifierTooLong { .. }
            | MigrateError::Unsupported(_) => EXIT_MIGRATION,
            MigrateError::Pool { .. }
            | MigrateError::Postgres(_)
            | MigrateError::Mysql(_)
            | MigrateError::Mssql(_)
            | MigrateError::Sqlite(_) => EXIT_DATABASE,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) | MigrateError::Json(_) => EXIT_IO,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_platform_message_names_platform() {
        let err = MigrateError::IncompatiblePlatform {
            platform: Platform::Sqlite,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("The \"sqlite\" platform does not support foreign key constraints"));
        assert_eq!(err.exit_code(), EXIT_MIGRATION);
    }

    #[test]
    fn test_circular_dependency_lists_cycle() {
        let err = MigrateError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG);
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(MigrateError::pool("down", "connecting").exit_code(), EXIT_DATABASE);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::missing_column("users", "id");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Column id does not exist on table users"));
    }
}
