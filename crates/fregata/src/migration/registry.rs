use crate::error::{MigrateError, Result};

use super::{Migration, MigrationContext, MigrationOptions};

struct Entry {
    migration: Migration,
    options: MigrationOptions,
    parent: Option<String>,
}

/// Named migrations, in registration order.
#[derive(Default)]
pub struct MigrationRegistry {
    entries: Vec<(String, Entry)>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration under a unique name.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        migration: Migration,
        options: MigrationOptions,
        parent: Option<String>,
    ) -> Result<()> {
        let name = name.into();
        if self.entries.iter().any(|(n, _)| *n == name) {
            return Err(MigrateError::DuplicateMigration { name });
        }
        self.entries.push((
            name,
            Entry {
                migration,
                options,
                parent,
            },
        ));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Migration> {
        self.entry(name).map(|e| &e.migration)
    }

    pub fn parent(&self, name: &str) -> Option<&str> {
        self.entry(name).and_then(|e| e.parent.as_deref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Context to run the named migration in.
    pub fn context(&self, name: &str) -> Result<MigrationContext<'_>> {
        let (name, entry) = self
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| MigrateError::UnknownMigration(name.to_string()))?;

        Ok(MigrationContext::new(
            &entry.migration,
            name,
            &entry.options,
            entry.parent.as_deref(),
        ))
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut registry = MigrationRegistry::new();
        registry
            .add("base", Migration::new(), MigrationOptions::new(), None)
            .unwrap();
        registry
            .add(
                "nightly",
                Migration::new(),
                MigrationOptions::new(),
                Some("base".into()),
            )
            .unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["base", "nightly"]);
        assert_eq!(registry.parent("nightly"), Some("base"));
        assert!(registry.get("base").is_some());

        let context = registry.context("nightly").unwrap();
        assert_eq!(context.name(), "nightly");
        assert_eq!(context.parent(), Some("base"));
    }

    #[test]
    fn test_duplicate_name() {
        let mut registry = MigrationRegistry::new();
        registry
            .add("base", Migration::new(), MigrationOptions::new(), None)
            .unwrap();
        let err = registry
            .add("base", Migration::new(), MigrationOptions::new(), None)
            .unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateMigration { name } if name == "base"));
    }

    #[test]
    fn test_unknown_context() {
        let registry = MigrationRegistry::new();
        assert!(matches!(
            registry.context("missing"),
            Err(MigrateError::UnknownMigration(name)) if name == "missing"
        ));
    }
}
