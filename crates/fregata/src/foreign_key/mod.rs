//! Foreign key preservation across regenerated primary keys.
//!
//! When a target database assigns new keys to copied rows, every foreign key
//! pointing at those rows has to follow. The protocol runs in three steps:
//!
//! 1. [`ForeignKeyBeforeTask`] adds shadow columns holding the *old* key on
//!    the referenced table and the *old* foreign key value on the
//!    referencing table, and relaxes NOT NULL where asked.
//! 2. Migrators copy rows, writing old values into the shadow columns.
//! 3. [`ForeignKeyAfterTask`] joins both tables on the shadow columns,
//!    writes the new keys into the real foreign key columns, drops the
//!    shadow columns and restores NOT NULL.

mod after;
mod before;
pub mod naming;
pub mod repair;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::identifier::check_length;
use crate::core::schema::{ForeignKeyConstraint, Index};
use crate::core::traits::Connection;
use crate::error::{MigrateError, Result};
use crate::migration::Migration;
use crate::migrator::MigratorId;

pub use after::ForeignKeyAfterTask;
pub use before::ForeignKeyBeforeTask;
pub use naming::{ShadowColumn, ShadowNaming, SHADOW_PREFIX};
pub use repair::{
    build_copied_count, build_identity_fill, build_repair_update, RepairColumn, RepairPlan,
};

/// One relationship a migrator wants preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    constraint: ForeignKeyConstraint,
    table_name: String,
    allow_null: Vec<String>,
}

impl ForeignKey {
    /// Bind a constraint to its local table.
    ///
    /// `allow_null` lists local columns whose NOT NULL is lifted while rows
    /// are copied; each must belong to the constraint.
    pub fn new(
        constraint: ForeignKeyConstraint,
        table_name: impl Into<String>,
        allow_null: Vec<String>,
    ) -> Result<Self> {
        let table_name = table_name.into();

        if constraint.local_columns.is_empty()
            || constraint.local_columns.len() != constraint.foreign_columns.len()
        {
            return Err(MigrateError::Config(format!(
                "Foreign key on table \"{}\" must pair each local column with one foreign column.",
                table_name
            )));
        }

        for column in &allow_null {
            if !constraint.local_columns.contains(column) {
                return Err(MigrateError::Config(format!(
                    "The \"{}\" column is not part of the foreign key on table \"{}\".",
                    column, table_name
                )));
            }
        }

        Ok(Self {
            constraint,
            table_name,
            allow_null,
        })
    }

    pub fn constraint(&self) -> &ForeignKeyConstraint {
        &self.constraint
    }

    /// Referencing table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Referenced table.
    pub fn foreign_table(&self) -> &str {
        &self.constraint.foreign_table
    }

    pub fn local_columns(&self) -> &[String] {
        &self.constraint.local_columns
    }

    pub fn foreign_columns(&self) -> &[String] {
        &self.constraint.foreign_columns
    }

    pub fn allow_null(&self) -> &[String] {
        &self.allow_null
    }

    /// Shadows added to the referenced table.
    pub fn referenced_shadows(&self, naming: &ShadowNaming) -> Vec<ShadowColumn> {
        self.foreign_columns()
            .iter()
            .map(|c| naming.referenced(self.foreign_table(), c))
            .collect()
    }

    /// Shadows added to the referencing table.
    pub fn referencing_shadows(&self, naming: &ShadowNaming) -> Vec<ShadowColumn> {
        self.local_columns()
            .iter()
            .map(|c| naming.referencing(&self.table_name, c))
            .collect()
    }
}

/// Migrator capability: relationships to keep across the copy.
#[async_trait]
pub trait HasForeignKeys: Send + Sync {
    /// Target connection holding both sides of every relationship.
    async fn connection(&self) -> Result<Arc<dyn Connection>>;

    /// Relationships to preserve.
    async fn foreign_keys(&self) -> Result<Vec<ForeignKey>>;
}

/// Foreign keys of one migrator, resolved against its live connection.
pub(crate) struct ForeignKeyTarget {
    pub migrator: MigratorId,
    pub connection: Arc<dyn Connection>,
    pub foreign_keys: Vec<ForeignKey>,
}

/// Resolve every migrator declaring foreign keys, in execution order.
///
/// Fails before returning anything if one connection cannot enforce
/// foreign keys or if a shadow name would not fit the engine.
pub(crate) async fn collect_targets(
    migration: &Migration,
    naming: &ShadowNaming,
) -> Result<Vec<ForeignKeyTarget>> {
    let mut targets = Vec::new();

    for migrator in migration.ordered()? {
        let Some(holder) = migrator.foreign_keys() else {
            continue;
        };

        let connection = holder.connection().await?;
        if !connection.supports_foreign_keys().await? {
            return Err(MigrateError::IncompatiblePlatform {
                platform: connection.platform(),
            });
        }

        let foreign_keys = holder.foreign_keys().await?;
        for fk in &foreign_keys {
            for shadow in fk
                .referenced_shadows(naming)
                .iter()
                .chain(fk.referencing_shadows(naming).iter())
            {
                check_length(&shadow.column, connection.platform())?;
                check_length(&shadow.index, connection.platform())?;
            }
        }

        debug!(
            "Migrator {} preserves {} foreign key(s) on connection {}",
            migrator.id(),
            foreign_keys.len(),
            connection.name()
        );

        targets.push(ForeignKeyTarget {
            migrator: migrator.id(),
            connection,
            foreign_keys,
        });
    }

    Ok(targets)
}

/// Add each missing shadow column with its index. Existing ones are kept.
///
/// Returns the number of columns created.
pub(crate) async fn add_shadow_columns(
    connection: &dyn Connection,
    table: &str,
    shadows: &[ShadowColumn],
) -> Result<usize> {
    let details = connection.describe_table(table).await?;
    let mut created = 0;

    for shadow in shadows {
        if details.has_column(&shadow.column) {
            debug!("Shadow column {}.{} already exists", table, shadow.column);
            continue;
        }

        let original = details
            .column(&shadow.original)
            .ok_or_else(|| MigrateError::missing_column(table, &shadow.original))?;

        connection
            .add_column(table, &original.shadow(&shadow.column))
            .await?;
        connection
            .create_index(table, &Index::new(&shadow.index, vec![shadow.column.clone()]))
            .await?;
        created += 1;
    }

    Ok(created)
}

/// Drop shadow indexes and columns. Absent ones are skipped.
pub(crate) async fn drop_shadow_columns(
    connection: &dyn Connection,
    table: &str,
    shadows: &[ShadowColumn],
) -> Result<usize> {
    if shadows.is_empty() {
        return Ok(0);
    }

    let details = connection.describe_table(table).await?;
    let mut dropped = 0;

    for shadow in shadows {
        if details.has_index(&shadow.index) {
            connection.drop_index(table, &shadow.index).await?;
        }
        if details.has_column(&shadow.column) {
            connection.drop_column(table, &shadow.column).await?;
            dropped += 1;
        }
    }

    Ok(dropped)
}

/// Set the nullability of the `allow_null` columns of a foreign key.
///
/// Columns already in the requested state are left alone.
pub(crate) async fn set_allow_null(
    connection: &dyn Connection,
    fk: &ForeignKey,
    nullable: bool,
) -> Result<()> {
    if fk.allow_null().is_empty() {
        return Ok(());
    }

    let details = connection.describe_table(fk.table_name()).await?;
    for name in fk.allow_null() {
        let column = details
            .column(name)
            .ok_or_else(|| MigrateError::missing_column(fk.table_name(), name))?;
        if column.is_nullable != nullable {
            connection
                .set_nullable(fk.table_name(), column, nullable)
                .await?;
        }
    }
    Ok(())
}

/// Reference counts of shadow columns still needed by later foreign keys.
///
/// Two foreign keys pointing at the same table share its shadow columns;
/// those columns may only go once the last of them has been repaired.
#[derive(Debug, Default)]
pub(crate) struct PendingShadows {
    counts: HashMap<(String, String, String), usize>,
}

impl PendingShadows {
    pub fn new(targets: &[ForeignKeyTarget], naming: &ShadowNaming) -> Self {
        let mut pending = Self::default();
        for target in targets {
            let conn = target.connection.name();
            for fk in &target.foreign_keys {
                for shadow in fk.referenced_shadows(naming) {
                    pending.acquire(conn, fk.foreign_table(), &shadow);
                }
                for shadow in fk.referencing_shadows(naming) {
                    pending.acquire(conn, fk.table_name(), &shadow);
                }
            }
        }
        pending
    }

    fn acquire(&mut self, connection: &str, table: &str, shadow: &ShadowColumn) {
        *self
            .counts
            .entry(Self::key(connection, table, shadow))
            .or_insert(0) += 1;
    }

    /// Give back one use of each shadow; returns those nobody needs anymore.
    pub fn release(
        &mut self,
        connection: &str,
        table: &str,
        shadows: Vec<ShadowColumn>,
    ) -> Vec<ShadowColumn> {
        shadows
            .into_iter()
            .filter(|shadow| {
                let key = Self::key(connection, table, shadow);
                match self.counts.get_mut(&key) {
                    Some(count) if *count > 1 => {
                        *count -= 1;
                        false
                    }
                    _ => {
                        self.counts.remove(&key);
                        true
                    }
                }
            })
            .collect()
    }

    fn key(connection: &str, table: &str, shadow: &ShadowColumn) -> (String, String, String) {
        (
            connection.to_string(),
            table.to_string(),
            shadow.column.clone(),
        )
    }
}
