//! Configuration loading, inheritance and registry construction.

mod types;
mod validation;

pub use types::*;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::drivers::ConnectionHandle;
use crate::error::{MigrateError, Result};
use crate::foreign_key::{ForeignKeyAfterTask, ForeignKeyBeforeTask, ShadowNaming};
use crate::migration::{Migration, MigrationRegistry, SqlTask, Task};
use crate::migrator::TableMigrator;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// A migration with its ancestors folded in.
    ///
    /// Options merge with the child winning; migrators and tasks list the
    /// parent's first. `parent` keeps the direct parent's name.
    pub fn resolve(&self, name: &str) -> Result<MigrationDefinition> {
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());

        while let Some(next) = current {
            if chain.contains(&next) {
                chain.push(next);
                return Err(MigrateError::Config(format!(
                    "Migration parents form a cycle: {}",
                    chain.join(" -> ")
                )));
            }
            let definition = self.migrations.get(&next).ok_or_else(|| {
                if chain.is_empty() {
                    MigrateError::UnknownMigration(next.clone())
                } else {
                    MigrateError::Config(format!(
                        "Migration '{}' has unknown parent '{}'",
                        chain[chain.len() - 1],
                        next
                    ))
                }
            })?;
            current = definition.parent.clone();
            chain.push(next);
        }

        let mut resolved = MigrationDefinition::default();
        for ancestor in chain.iter().rev() {
            let definition = &self.migrations[ancestor];
            resolved.options.extend(definition.options.clone());
            resolved.migrators.extend(definition.migrators.iter().cloned());
            resolved.tasks.before.extend(definition.tasks.before.iter().cloned());
            resolved.tasks.after.extend(definition.tasks.after.iter().cloned());
        }
        resolved.parent = self.migrations[name].parent.clone();

        Ok(resolved)
    }

    /// One lazily opened handle per configured connection.
    pub fn connection_handles(&self) -> BTreeMap<String, ConnectionHandle> {
        self.connections
            .iter()
            .map(|(name, config)| (name.clone(), ConnectionHandle::lazy(name, config.clone())))
            .collect()
    }

    /// Build every configured migration. No connection is opened.
    pub fn registry(
        &self,
        handles: &BTreeMap<String, ConnectionHandle>,
    ) -> Result<MigrationRegistry> {
        let mut registry = MigrationRegistry::new();
        for name in self.migrations.keys() {
            let definition = self.resolve(name)?;
            let migration = build_migration(&definition, handles)?;
            debug!(
                "Migration {}: {} migrator(s), {} before task(s), {} after task(s)",
                name,
                migration.len(),
                migration.before_tasks().len(),
                migration.after_tasks().len()
            );
            registry.add(
                name.clone(),
                migration,
                definition.options,
                definition.parent,
            )?;
        }
        Ok(registry)
    }
}

fn handle(handles: &BTreeMap<String, ConnectionHandle>, name: &str) -> Result<ConnectionHandle> {
    handles
        .get(name)
        .cloned()
        .ok_or_else(|| MigrateError::Config(format!("Unknown connection '{}'", name)))
}

fn build_migration(
    definition: &MigrationDefinition,
    handles: &BTreeMap<String, ConnectionHandle>,
) -> Result<Migration> {
    let mut migration = Migration::new();

    for migrator in &definition.migrators {
        migration.add(Box::new(TableMigrator::new(
            migrator.clone(),
            handle(handles, &migrator.source)?,
            handle(handles, &migrator.target)?,
        )))?;
    }

    for task in &definition.tasks.before {
        let task: Box<dyn Task> = match task {
            TaskConfig::Builtin(BuiltinTask::ForeignKeys) => {
                Box::new(ForeignKeyBeforeTask::new(ShadowNaming::new()))
            }
            TaskConfig::Sql { connection, sql } => {
                Box::new(SqlTask::new(handle(handles, connection)?, sql.clone()))
            }
        };
        migration.add_before_task(task);
    }

    for task in &definition.tasks.after {
        let task: Box<dyn Task> = match task {
            TaskConfig::Builtin(BuiltinTask::ForeignKeys) => {
                Box::new(ForeignKeyAfterTask::new(ShadowNaming::new()))
            }
            TaskConfig::Sql { connection, sql } => {
                Box::new(SqlTask::new(handle(handles, connection)?, sql.clone()))
            }
        };
        migration.add_after_task(task);
    }

    Ok(migration)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
connections:
  legacy:
    type: sqlite
    path: ":memory:"
  shop:
    type: sqlite
    path: ":memory:"
migrations:
  base:
    options:
      batch: small
      region: eu
    migrators:
      - name: customers
        source: legacy
        target: shop
        source_table: customers
        regenerated_keys: [id]
    tasks:
      before: [foreign_keys]
      after: [foreign_keys]
  full:
    parent: base
    options:
      region: us
    migrators:
      - name: orders
        source: legacy
        target: shop
        source_table: orders
        depends_on: [customers]
        introspect_foreign_keys: true
    tasks:
      after:
        - connection: shop
          sql: DELETE FROM audit
"#;

    #[test]
    fn test_resolve_inherits_from_parent() {
        let config = Config::from_yaml(YAML).unwrap();
        let full = config.resolve("full").unwrap();

        assert_eq!(full.parent.as_deref(), Some("base"));
        assert_eq!(full.options["region"], serde_yaml::Value::from("us"));
        assert_eq!(full.options["batch"], serde_yaml::Value::from("small"));
        let names: Vec<_> = full.migrators.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);
        assert_eq!(full.tasks.before.len(), 1);
        assert_eq!(full.tasks.after.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_and_cyclic_parents() {
        let mut config = Config::from_yaml(YAML).unwrap();
        assert!(matches!(
            config.resolve("nope"),
            Err(MigrateError::UnknownMigration(_))
        ));

        config.migrations.get_mut("base").unwrap().parent = Some("full".into());
        let err = config.resolve("full").unwrap_err();
        assert!(err.to_string().contains("full -> base -> full"));

        config.migrations.get_mut("base").unwrap().parent = Some("ghost".into());
        assert!(config.resolve("full").unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn test_registry_builds_every_migration() {
        let config = Config::from_yaml(YAML).unwrap();
        let handles = config.connection_handles();
        let registry = config.registry(&handles).unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["base", "full"]);
        assert_eq!(registry.parent("full"), Some("base"));

        let full = registry.get("full").unwrap();
        assert_eq!(full.len(), 2);
        assert_eq!(full.before_tasks()[0].name(), "foreign_keys_before");
        assert_eq!(full.after_tasks()[1].name(), "sql");

        let order: Vec<_> = full.ordered().unwrap().iter().map(|m| m.id()).collect();
        assert_eq!(order[0].as_str(), "customers");

        // Nothing connects while building
        assert!(handles.values().all(|h| !h.is_open()));
    }
}
