//! Migrations: a graph of migrators plus the tasks around them.
//!
//! A [`Migration`] owns its migrators and sorts them so each runs after the
//! migrators it depends on. Before-tasks run ahead of the first migrator,
//! after-tasks once the last one is done.

mod registry;
mod sort;
mod task;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::migrator::Migrator;

pub use registry::MigrationRegistry;
pub use task::{SqlTask, Task};

/// Free-form options attached to a migration.
pub type MigrationOptions = BTreeMap<String, serde_yaml::Value>;

/// Migrators and tasks making up one migration.
///
/// The execution order is computed on first use and kept until the next
/// [`Migration::add`].
#[derive(Default)]
pub struct Migration {
    migrators: Vec<Box<dyn Migrator>>,
    before_tasks: Vec<Box<dyn Task>>,
    after_tasks: Vec<Box<dyn Task>>,
    order: Mutex<Option<Arc<[usize]>>>,
}

impl Migration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migrator. Its id must not be taken yet.
    pub fn add(&mut self, migrator: Box<dyn Migrator>) -> Result<()> {
        let id = migrator.id();
        if self.migrators.iter().any(|m| m.id() == id) {
            return Err(MigrateError::DuplicateMigrator {
                migrator: id.to_string(),
            });
        }

        debug!("Adding migrator {}", id);
        self.migrators.push(migrator);
        *self.order.get_mut() = None;
        Ok(())
    }

    pub fn add_before_task(&mut self, task: Box<dyn Task>) {
        self.before_tasks.push(task);
    }

    pub fn add_after_task(&mut self, task: Box<dyn Task>) {
        self.after_tasks.push(task);
    }

    pub fn before_tasks(&self) -> &[Box<dyn Task>] {
        &self.before_tasks
    }

    pub fn after_tasks(&self) -> &[Box<dyn Task>] {
        &self.after_tasks
    }

    /// Migrators in insertion order.
    pub fn migrators(&self) -> &[Box<dyn Migrator>] {
        &self.migrators
    }

    pub fn len(&self) -> usize {
        self.migrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrators.is_empty()
    }

    /// Migrators in execution order.
    ///
    /// Fails on a dependency cycle or on a dependency that is not part of
    /// this migration.
    pub fn ordered(&self) -> Result<Vec<&dyn Migrator>> {
        let order = self.order()?;
        Ok(order.iter().map(|&i| self.migrators[i].as_ref()).collect())
    }

    /// Iterate the migrators in execution order.
    ///
    /// The order is resolved up front; iterating again reuses it.
    pub fn process(&self) -> Result<impl Iterator<Item = &dyn Migrator> + '_> {
        let order = self.order()?;
        Ok((0..order.len()).map(move |pos| self.migrators[order[pos]].as_ref()))
    }

    fn order(&self) -> Result<Arc<[usize]>> {
        let mut cached = self.order.lock();
        if let Some(order) = cached.as_ref() {
            return Ok(Arc::clone(order));
        }

        let nodes: Vec<_> = self
            .migrators
            .iter()
            .map(|m| (m.id(), m.dependencies().unwrap_or_default()))
            .collect();
        let order: Arc<[usize]> = sort::topological_order(&nodes)?.into();
        debug!(
            "Execution order: {}",
            order
                .iter()
                .map(|&i| nodes[i].0.to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        *cached = Some(Arc::clone(&order));
        Ok(order)
    }
}

/// What a task sees of the migration it runs in.
#[derive(Clone, Copy)]
pub struct MigrationContext<'a> {
    migration: &'a Migration,
    name: &'a str,
    options: &'a MigrationOptions,
    parent: Option<&'a str>,
}

impl<'a> MigrationContext<'a> {
    pub fn new(
        migration: &'a Migration,
        name: &'a str,
        options: &'a MigrationOptions,
        parent: Option<&'a str>,
    ) -> Self {
        Self {
            migration,
            name,
            options,
            parent,
        }
    }

    pub fn migration(&self) -> &'a Migration {
        self.migration
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn options(&self) -> &'a MigrationOptions {
        self.options
    }

    /// Option by key.
    pub fn option(&self, key: &str) -> Option<&'a serde_yaml::Value> {
        self.options.get(key)
    }

    pub fn parent(&self) -> Option<&'a str> {
        self.parent
    }
}
