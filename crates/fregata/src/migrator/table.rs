//! Config-driven migrator copying one table between two connections.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::MigratorConfig;
use crate::core::schema::ForeignKeyConstraint;
use crate::core::traits::{Connection, SelectQueryOptions};
use crate::core::value::{Batch, Row};
use crate::drivers::ConnectionHandle;
use crate::error::Result;
use crate::foreign_key::{ForeignKey, HasForeignKeys, ShadowNaming};

use super::{Migrator, MigratorId, Puller, Pusher};

/// Copies `source_table` into `target_table`.
///
/// Columns listed in `regenerated_keys` are written to the referenced
/// shadow column instead of the real one, so the target assigns new keys.
/// Local columns of preserved foreign keys are written to the referencing
/// shadow column; the foreign key task relinks them once every row is in.
pub struct TableMigrator {
    config: MigratorConfig,
    source: ConnectionHandle,
    target: ConnectionHandle,
    naming: ShadowNaming,
}

impl TableMigrator {
    pub fn new(config: MigratorConfig, source: ConnectionHandle, target: ConnectionHandle) -> Self {
        Self {
            config,
            source,
            target,
            naming: ShadowNaming::new(),
        }
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    fn preserves_foreign_keys(&self) -> bool {
        !self.config.foreign_keys.is_empty() || self.config.introspect_foreign_keys
    }

    /// Declared relationships followed by introspected ones not already declared.
    async fn resolve_foreign_keys(&self, target: &dyn Connection) -> Result<Vec<ForeignKey>> {
        let table = self.config.target_table();
        let mut constraints: Vec<ForeignKeyConstraint> = self
            .config
            .foreign_keys
            .iter()
            .map(|fk| ForeignKeyConstraint {
                name: fk.name.clone(),
                local_columns: fk.columns.clone(),
                foreign_table: fk.foreign_table.clone(),
                foreign_columns: fk.foreign_columns.clone(),
            })
            .collect();

        if self.config.introspect_foreign_keys {
            for found in target.list_foreign_keys(table).await? {
                let declared = constraints.iter().any(|c| {
                    c.foreign_table == found.foreign_table && c.local_columns == found.local_columns
                });
                if !declared {
                    constraints.push(found);
                }
            }
        }

        constraints
            .into_iter()
            .map(|constraint| {
                let allow_null = self
                    .config
                    .allow_null
                    .iter()
                    .filter(|c| constraint.local_columns.contains(c))
                    .cloned()
                    .collect();
                ForeignKey::new(constraint, table, allow_null)
            })
            .collect()
    }
}

#[async_trait]
impl Migrator for TableMigrator {
    fn id(&self) -> MigratorId {
        MigratorId::from(self.config.name.clone())
    }

    async fn puller(&self) -> Result<Box<dyn Puller>> {
        let connection = self.source.get().await?;
        let table = self.config.source_table.clone();

        let order_by = if self.config.order_by.is_empty() {
            let primary_key = connection.describe_table(&table).await?.primary_key();
            if primary_key.is_empty() {
                warn!(
                    "{} has no primary key and no order_by; paging order is engine-defined",
                    table
                );
            }
            primary_key
        } else {
            self.config.order_by.clone()
        };

        Ok(Box::new(TablePuller {
            connection,
            table,
            columns: self.config.columns.clone(),
            order_by,
            batch_size: self.config.batch_size.max(1),
            offset: 0,
            done: false,
        }))
    }

    async fn pusher(&self) -> Result<Box<dyn Pusher>> {
        let connection = self.target.get().await?;
        let table = self.config.target_table().to_string();
        let details = connection.describe_table(&table).await?;

        let foreign_keys = if self.preserves_foreign_keys() {
            self.resolve_foreign_keys(connection.as_ref()).await?
        } else {
            Vec::new()
        };

        let mut renames = Vec::new();
        let mut skipped = HashSet::new();

        for key in &self.config.regenerated_keys {
            let shadow = self.naming.referenced_column(&table, key);
            if details.has_column(&shadow) {
                renames.push((key.clone(), shadow));
            } else {
                debug!("{}.{} is regenerated and not referenced", table, key);
                skipped.insert(key.clone());
            }
        }

        for fk in &foreign_keys {
            for local in fk.local_columns() {
                let shadow = self.naming.referencing_column(&table, local);
                if details.has_column(&shadow) && !renames.iter().any(|(c, _)| c == local) {
                    renames.push((local.clone(), shadow));
                }
            }
        }

        // Kept keys that other tables reference: the old value equals the
        // new one, so it also goes to the referenced shadow.
        let mut copies = Vec::new();
        for column in &details.columns {
            if self.config.regenerated_keys.contains(&column.name) {
                continue;
            }
            let shadow = self.naming.referenced_column(&table, &column.name);
            if details.has_column(&shadow) {
                debug!("{}.{} is kept and copied to {}", table, column.name, shadow);
                copies.push((column.name.clone(), shadow));
            }
        }

        Ok(Box::new(TablePusher {
            connection,
            table,
            renames,
            copies,
            skipped,
        }))
    }

    fn dependencies(&self) -> Option<Vec<MigratorId>> {
        if self.config.depends_on.is_empty() {
            return None;
        }
        Some(
            self.config
                .depends_on
                .iter()
                .cloned()
                .map(MigratorId::from)
                .collect(),
        )
    }

    fn foreign_keys(&self) -> Option<&dyn HasForeignKeys> {
        if self.preserves_foreign_keys() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl HasForeignKeys for TableMigrator {
    async fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.target.get().await
    }

    async fn foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let connection = self.target.get().await?;
        self.resolve_foreign_keys(connection.as_ref()).await
    }
}

/// Reads a table page by page.
pub struct TablePuller {
    connection: Arc<dyn Connection>,
    table: String,
    columns: Vec<String>,
    order_by: Vec<String>,
    batch_size: usize,
    offset: usize,
    done: bool,
}

#[async_trait]
impl Puller for TablePuller {
    async fn pull(&mut self) -> Result<Option<Batch>> {
        if self.done {
            return Ok(None);
        }

        let sql = self.connection.dialect().build_select_query(&SelectQueryOptions {
            table: self.table.clone(),
            columns: self.columns.clone(),
            order_by: self.order_by.clone(),
            limit: Some(self.batch_size),
            offset: Some(self.offset),
        });
        debug!("{}", sql);

        let rows = self.connection.query(&sql).await?;
        self.offset += rows.len();
        if rows.len() < self.batch_size {
            self.done = true;
        }

        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }

    async fn count(&mut self) -> Result<Option<u64>> {
        Ok(Some(self.connection.count(&self.table).await?))
    }
}

/// Inserts rows one by one, moving key values into shadow columns.
pub struct TablePusher {
    connection: Arc<dyn Connection>,
    table: String,
    /// Source column to shadow column.
    renames: Vec<(String, String)>,
    /// Source column also written to a shadow column.
    copies: Vec<(String, String)>,
    /// Regenerated keys with nowhere to go.
    skipped: HashSet<String>,
}

impl TablePusher {
    fn map_row(&self, row: Row) -> Row {
        let mut out = Row::new();
        for (column, value) in row {
            if self.skipped.contains(&column) {
                continue;
            }
            if let Some((_, shadow)) = self.copies.iter().find(|(c, _)| *c == column) {
                out.set(shadow.clone(), value.clone());
            }
            match self.renames.iter().find(|(c, _)| *c == column) {
                Some((_, shadow)) => out.set(shadow.clone(), value),
                None => out.set(column, value),
            }
        }
        out
    }
}

#[async_trait]
impl Pusher for TablePusher {
    async fn push(&mut self, row: Row) -> Result<u64> {
        let row = self.map_row(row);
        self.connection.insert(&self.table, &row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use crate::drivers::SqliteConnection;

    fn config(yaml: &str) -> MigratorConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    async fn handle(name: &str, ddl: &str) -> ConnectionHandle {
        let conn = SqliteConnection::in_memory(name).unwrap();
        conn.execute(ddl).await.unwrap();
        ConnectionHandle::ready(Arc::new(conn))
    }

    #[tokio::test]
    async fn test_puller_pages_in_primary_key_order() {
        let source = handle(
            "source",
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO items VALUES (3, 'c'), (1, 'a'), (2, 'b');",
        )
        .await;
        let target = handle("target", "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);").await;

        let migrator = TableMigrator::new(
            config("{name: items, source: source, target: target, source_table: items, batch_size: 2}"),
            source,
            target,
        );

        let mut puller = migrator.puller().await.unwrap();
        assert_eq!(puller.count().await.unwrap(), Some(3));

        let first = puller.pull().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get("id"), Some(&SqlValue::I64(1)));
        let second = puller.pull().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].get("name"), Some(&SqlValue::Text("c".into())));
        assert!(puller.pull().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pusher_moves_keys_into_existing_shadows() {
        let source = handle("source", "CREATE TABLE parent (id INTEGER PRIMARY KEY);").await;
        let target = handle(
            "target",
            "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT, _fregata_referenced_6_parent_id INTEGER);",
        )
        .await;

        let migrator = TableMigrator::new(
            config(
                "{name: parent, source: source, target: target, source_table: parent, \
                  regenerated_keys: [id]}",
            ),
            source,
            target.clone(),
        );

        let mut pusher = migrator.pusher().await.unwrap();
        pusher
            .push(Row::new().with("id", 40).with("name", "a"))
            .await
            .unwrap();

        let rows = target
            .get()
            .await
            .unwrap()
            .query("SELECT id, name, _fregata_referenced_6_parent_id AS old FROM parent")
            .await
            .unwrap();
        assert_eq!(rows[0].get("id"), Some(&SqlValue::I64(1)));
        assert_eq!(rows[0].get("old"), Some(&SqlValue::I64(40)));
    }

    #[tokio::test]
    async fn test_pusher_copies_kept_keys_into_shadows() {
        let source = handle("source", "CREATE TABLE cat (code TEXT PRIMARY KEY);").await;
        let target = handle(
            "target",
            "CREATE TABLE cat (code TEXT PRIMARY KEY, _fregata_referenced_3_cat_code TEXT);",
        )
        .await;

        let migrator = TableMigrator::new(
            config("{name: cat, source: source, target: target, source_table: cat}"),
            source,
            target.clone(),
        );

        let mut pusher = migrator.pusher().await.unwrap();
        pusher.push(Row::new().with("code", "a")).await.unwrap();

        let rows = target
            .get()
            .await
            .unwrap()
            .query("SELECT code, _fregata_referenced_3_cat_code AS old FROM cat")
            .await
            .unwrap();
        assert_eq!(rows[0].get("code"), Some(&SqlValue::from("a")));
        assert_eq!(rows[0].get("old"), Some(&SqlValue::from("a")));
    }

    #[tokio::test]
    async fn test_regenerated_key_without_shadow_is_dropped() {
        let source = handle("source", "CREATE TABLE t (id INTEGER PRIMARY KEY);").await;
        let target = handle("target", "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);").await;

        let migrator = TableMigrator::new(
            config("{name: t, source: source, target: target, source_table: t, regenerated_keys: [id]}"),
            source,
            target.clone(),
        );
        let mut pusher = migrator.pusher().await.unwrap();
        pusher.push(Row::new().with("id", 9).with("v", "x")).await.unwrap();

        let conn = target.get().await.unwrap();
        let rows = conn.query("SELECT id FROM t").await.unwrap();
        assert_eq!(rows[0].get("id"), Some(&SqlValue::I64(1)));
    }

    #[tokio::test]
    async fn test_foreign_keys_declared_and_introspected() {
        let source = handle("source", "CREATE TABLE child (id INTEGER PRIMARY KEY);").await;
        let target = handle(
            "target",
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE other (code TEXT PRIMARY KEY);
             CREATE TABLE child (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER NOT NULL REFERENCES parent (id),
                 other_code TEXT REFERENCES other (code)
             );",
        )
        .await;

        let migrator = TableMigrator::new(
            config(
                "{name: child, source: source, target: target, source_table: child, \
                  depends_on: [parent], introspect_foreign_keys: true, allow_null: [parent_id], \
                  foreign_keys: [{columns: [parent_id], foreign_table: parent, foreign_columns: [id]}]}",
            ),
            source,
            target,
        );

        assert_eq!(migrator.dependencies(), Some(vec![MigratorId::from("parent")]));
        let holder = Migrator::foreign_keys(&migrator).unwrap();
        let fks = holder.foreign_keys().await.unwrap();
        assert_eq!(fks.len(), 2);
        assert_eq!(fks[0].foreign_table(), "parent");
        assert_eq!(fks[0].allow_null(), &["parent_id".to_string()]);
        assert_eq!(fks[1].foreign_table(), "other");
        assert!(fks[1].allow_null().is_empty());
        assert_eq!(holder.connection().await.unwrap().name(), "target");
    }

    #[tokio::test]
    async fn test_plain_migrator_has_no_capabilities() {
        let source = handle("source", "CREATE TABLE t (id INTEGER);").await;
        let target = handle("target", "CREATE TABLE t (id INTEGER);").await;
        let migrator = TableMigrator::new(
            config("{name: t, source: source, target: target, source_table: t}"),
            source,
            target,
        );
        assert_eq!(migrator.id(), MigratorId::from("t"));
        assert!(migrator.dependencies().is_none());
        assert!(Migrator::foreign_keys(&migrator).is_none());
    }
}
