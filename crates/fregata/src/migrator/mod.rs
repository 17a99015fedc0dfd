//! Migrators: units copying one entity from a source to a target.
//!
//! A migrator provides a [`Puller`] reading source rows and a [`Pusher`]
//! writing them; an [`Executor`] drives one into the other. Two optional
//! capabilities shape how the migration treats it:
//!
//! - [`Migrator::dependencies`]: migrators that must run first
//! - [`Migrator::foreign_keys`]: relationships to preserve across
//!   regenerated keys

mod executor;
mod table;

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::foreign_key::HasForeignKeys;

pub use executor::{BatchExecutor, Executor, MemoryPuller, Puller, Pusher};
pub use table::TableMigrator;

/// Identity of a migrator within a migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MigratorId(Cow<'static, str>);

impl MigratorId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    /// Identity derived from a Rust type, for migrators with one instance
    /// per type.
    pub fn of<T: ?Sized>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<T>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for MigratorId {
    fn from(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
}

impl From<String> for MigratorId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

static DEFAULT_EXECUTOR: BatchExecutor = BatchExecutor;

/// A unit of data copy.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Identity; unique within a migration.
    fn id(&self) -> MigratorId;

    /// Reader of the rows to copy.
    async fn puller(&self) -> Result<Box<dyn Puller>>;

    /// Writer of the copied rows.
    async fn pusher(&self) -> Result<Box<dyn Pusher>>;

    /// Loop moving rows from the puller to the pusher.
    fn executor(&self) -> &dyn Executor {
        &DEFAULT_EXECUTOR
    }

    /// Migrators that must complete before this one starts.
    fn dependencies(&self) -> Option<Vec<MigratorId>> {
        None
    }

    /// Relationships to preserve, if any.
    fn foreign_keys(&self) -> Option<&dyn HasForeignKeys> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Customers;

    #[test]
    fn test_id_from_type() {
        let id = MigratorId::of::<Customers>();
        assert!(id.as_str().ends_with("Customers"));
        assert_eq!(id, MigratorId::of::<Customers>());
    }

    #[test]
    fn test_id_from_strings_compare_equal() {
        assert_eq!(MigratorId::from("orders"), MigratorId::from("orders".to_string()));
        assert_eq!(MigratorId::new("orders").to_string(), "orders");
    }
}
