//! Configuration validation.

use std::collections::HashSet;

use super::{Config, ConnectionConfig, TaskConfig};
use crate::core::platform::Platform;
use crate::drivers::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    for (name, connection) in &config.connections {
        validate_connection(name, connection)?;
    }

    for name in config.migrations.keys() {
        let migration = config.resolve(name)?;
        let mut seen = HashSet::new();

        for migrator in &migration.migrators {
            if !seen.insert(migrator.name.as_str()) {
                return Err(MigrateError::Config(format!(
                    "migrations.{}: migrator '{}' is defined twice",
                    name, migrator.name
                )));
            }
            for connection in [&migrator.source, &migrator.target] {
                require_connection(config, name, connection)?;
            }
            if migrator.batch_size == 0 {
                return Err(MigrateError::Config(format!(
                    "migrations.{}.{}: batch_size must be at least 1",
                    name, migrator.name
                )));
            }
            for fk in &migrator.foreign_keys {
                if fk.columns.is_empty() || fk.columns.len() != fk.foreign_columns.len() {
                    return Err(MigrateError::Config(format!(
                        "migrations.{}.{}: foreign key to '{}' must pair each column with one foreign column",
                        name, migrator.name, fk.foreign_table
                    )));
                }
            }
        }

        for task in migration.tasks.before.iter().chain(&migration.tasks.after) {
            if let TaskConfig::Sql { connection, .. } = task {
                require_connection(config, name, connection)?;
            }
        }
    }

    Ok(())
}

fn require_connection(config: &Config, migration: &str, connection: &str) -> Result<()> {
    if config.connections.contains_key(connection) {
        Ok(())
    } else {
        Err(MigrateError::Config(format!(
            "migrations.{}: unknown connection '{}'",
            migration, connection
        )))
    }
}

fn validate_connection(name: &str, connection: &ConnectionConfig) -> Result<()> {
    match connection.platform()? {
        Platform::Sqlite => {
            if connection.path.as_deref().map_or(true, str::is_empty) {
                return Err(MigrateError::Config(format!(
                    "connections.{}.path is required",
                    name
                )));
            }
        }
        _ => {
            if connection.host.is_empty() {
                return Err(MigrateError::Config(format!(
                    "connections.{}.host is required",
                    name
                )));
            }
            if connection.database.is_empty() {
                return Err(MigrateError::Config(format!(
                    "connections.{}.database is required",
                    name
                )));
            }
            if connection.user.is_empty() {
                return Err(MigrateError::Config(format!(
                    "connections.{}.user is required",
                    name
                )));
            }
            SslMode::parse(&connection.ssl_mode)?;
        }
    }

    if connection.pool_size == 0 {
        return Err(MigrateError::Config(format!(
            "connections.{}.pool_size must be at least 1",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    const VALID: &str = r#"
connections:
  legacy:
    type: mysql
    host: db.internal
    database: legacy
    user: reader
  shop:
    type: postgres
    database: shop
    user: app
    ssl_mode: verify-full
migrations:
  main:
    migrators:
      - name: customers
        source: legacy
        target: shop
        source_table: customers
"#;

    #[test]
    fn test_valid_config() {
        assert!(validate(&parse(VALID)).is_ok());
    }

    #[test]
    fn test_missing_network_fields() {
        let mut config = parse(VALID);
        config.connections.get_mut("legacy").unwrap().user.clear();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("connections.legacy.user"));

        let mut config = parse(VALID);
        config.connections.get_mut("shop").unwrap().ssl_mode = "prefer".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_sqlite_needs_path() {
        let config = parse("connections: {local: {type: sqlite}}");
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("connections.local.path"));
    }

    #[test]
    fn test_unknown_type() {
        let config = parse("connections: {x: {type: oracle, database: d, user: u}}");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_connection_in_migrator() {
        let mut config = parse(VALID);
        config.migrations.get_mut("main").unwrap().migrators[0].target = "nowhere".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("unknown connection 'nowhere'"));
    }

    #[test]
    fn test_unknown_connection_in_sql_task() {
        let mut config = parse(VALID);
        config
            .migrations
            .get_mut("main")
            .unwrap()
            .tasks
            .after
            .push(TaskConfig::Sql {
                connection: "ghost".into(),
                sql: "SELECT 1".into(),
            });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_migrator_across_parent() {
        let yaml = format!(
            "{}\n  child:\n    parent: main\n    migrators:\n      - {{name: customers, source: legacy, target: shop, source_table: c}}\n",
            VALID.trim_end()
        );
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = parse(VALID);
        config.migrations.get_mut("main").unwrap().migrators[0].batch_size = 0;
        assert!(validate(&config).is_err());
    }
}
