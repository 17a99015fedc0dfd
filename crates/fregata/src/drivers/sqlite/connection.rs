//! SQLite connection backed by a single rusqlite handle.
//!
//! Statements run synchronously under a mutex; no guard is held across an
//! await point. SQLite has no `ALTER COLUMN`, so nullability changes rebuild
//! the table.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, OptionalExtension, ToSql};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::core::identifier::quote_double;
use crate::core::schema::{Column, ForeignKeyConstraint, Index, TableDetails};
use crate::core::traits::{Connection, Dialect};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

use super::SqliteDialect;

/// SQLite database, on disk or in memory.
pub struct SqliteConnection {
    name: String,
    conn: Mutex<rusqlite::Connection>,
    dialect: SqliteDialect,
}

impl SqliteConnection {
    /// Open the database at `path` (`:memory:` for a private in-memory one).
    pub fn open(name: &str, config: &ConnectionConfig) -> Result<Self> {
        let path = config.path.as_deref().ok_or_else(|| {
            MigrateError::Config(format!("SQLite connection '{}' has no path", name))
        })?;

        let conn = if path == ":memory:" {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(Path::new(path))?
        };
        info!("Opened SQLite '{}': {}", name, path);

        Self::from_connection(name, conn)
    }

    /// Fresh in-memory database.
    pub fn in_memory(name: &str) -> Result<Self> {
        Self::from_connection(name, rusqlite::Connection::open_in_memory()?)
    }

    /// Wrap an open handle. Foreign key enforcement is switched on.
    pub fn from_connection(name: &str, conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self {
            name: name.to_string(),
            conn: Mutex::new(conn),
            dialect: SqliteDialect::new(),
        })
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn supports_foreign_keys(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let enabled: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(enabled == 1)
    }

    async fn describe_table(&self, table: &str) -> Result<TableDetails> {
        let conn = self.conn.lock();
        let info = table_info(&conn, table)?;
        if info.is_empty() {
            return Err(MigrateError::Config(format!(
                "Table '{}' not found on connection '{}'",
                table, self.name
            )));
        }

        let primary_key = primary_key_columns(&info);
        let rowid_alias = primary_key.len() == 1
            && info
                .iter()
                .any(|c| c.pk == 1 && c.data_type.eq_ignore_ascii_case("INTEGER"));

        let columns = info
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                data_type: c.data_type.clone(),
                is_nullable: !c.not_null && c.pk == 0,
                default: c.default.clone(),
                is_auto_increment: rowid_alias && c.pk == 1,
            })
            .collect();

        let mut indexes = index_list(&conn, table)?;
        if !primary_key.is_empty() && !indexes.iter().any(|i| i.index.is_primary) {
            // INTEGER PRIMARY KEY is the rowid and has no index of its own
            indexes.push(SqliteIndex {
                index: Index {
                    name: "primary".to_string(),
                    columns: primary_key,
                    is_unique: true,
                    is_primary: true,
                },
                origin: "pk".to_string(),
            });
        }

        let foreign_keys = foreign_key_list(&conn, table)?
            .into_iter()
            .map(|fk| fk.constraint)
            .collect();

        Ok(TableDetails {
            name: table.to_string(),
            columns,
            indexes: indexes.into_iter().map(|i| i.index).collect(),
            foreign_keys,
        })
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let conn = self.conn.lock();
        // execute_batch accepts several statements but reports no count
        let before: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
        conn.execute_batch(sql)?;
        let after: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok((after - before).max(0) as u64)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_value_ref(row.get_ref(i)?));
            }
            out.push(Row::from_parts(columns.clone(), values));
        }
        Ok(out)
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<u64> {
        let sql = self.dialect.build_insert(table, row.columns());
        let conn = self.conn.lock();
        let inserted = conn
            .execute(&sql, params_from_iter(row.values().iter()))
            .map_err(|e| {
                debug!("{}", sql);
                MigrateError::from(e)
            })?;
        Ok(inserted as u64)
    }

    async fn set_nullable(&self, table: &str, column: &Column, nullable: bool) -> Result<()> {
        let conn = self.conn.lock();
        rebuild_table(&conn, table, &column.name, nullable)
    }
}

/// One row of `PRAGMA table_info`.
struct ColumnInfo {
    name: String,
    data_type: String,
    not_null: bool,
    default: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pk: i64,
}

struct SqliteIndex {
    index: Index,
    /// `c` for CREATE INDEX, `u` for UNIQUE constraints, `pk` for the primary key.
    origin: String,
}

struct SqliteForeignKey {
    constraint: ForeignKeyConstraint,
    on_update: String,
    on_delete: String,
}

/// `PRAGMA [schema.]name(table)`.
fn pragma(name: &str, table: &str) -> String {
    match table.split_once('.') {
        Some((schema, table)) => format!(
            "PRAGMA {}.{}({})",
            quote_double(schema),
            name,
            quote_double(table)
        ),
        None => format!("PRAGMA {}({})", name, quote_double(table)),
    }
}

fn table_info(conn: &rusqlite::Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&pragma("table_info", table))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get("name")?,
                data_type: row.get("type")?,
                not_null: row.get::<_, i64>("notnull")? != 0,
                default: row.get("dflt_value")?,
                pk: row.get("pk")?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn primary_key_columns(info: &[ColumnInfo]) -> Vec<String> {
    let mut pk: Vec<&ColumnInfo> = info.iter().filter(|c| c.pk > 0).collect();
    pk.sort_by_key(|c| c.pk);
    pk.into_iter().map(|c| c.name.clone()).collect()
}

fn index_list(conn: &rusqlite::Connection, table: &str) -> Result<Vec<SqliteIndex>> {
    let entries: Vec<(String, bool, String)> = {
        let mut stmt = conn.prepare(&pragma("index_list", table))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get("name")?,
                    row.get::<_, i64>("unique")? != 0,
                    row.get("origin")?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut indexes = Vec::with_capacity(entries.len());
    for (name, is_unique, origin) in entries {
        let mut stmt = conn.prepare(&pragma("index_info", &name))?;
        let columns: Vec<Option<String>> = stmt
            .query_map([], |row| row.get("name"))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        indexes.push(SqliteIndex {
            index: Index {
                is_primary: origin == "pk",
                name,
                // Expression columns have no name
                columns: columns.into_iter().flatten().collect(),
                is_unique,
            },
            origin,
        });
    }
    Ok(indexes)
}

fn foreign_key_list(conn: &rusqlite::Connection, table: &str) -> Result<Vec<SqliteForeignKey>> {
    let rows: Vec<(i64, String, String, Option<String>, String, String)> = {
        let mut stmt = conn.prepare(&pragma("foreign_key_list", table))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get("id")?,
                    row.get("table")?,
                    row.get("from")?,
                    row.get("to")?,
                    row.get("on_update")?,
                    row.get("on_delete")?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut grouped: Vec<(i64, SqliteForeignKey, Vec<Option<String>>)> = Vec::new();
    for (id, foreign_table, from, to, on_update, on_delete) in rows {
        match grouped.iter_mut().find(|(gid, _, _)| *gid == id) {
            Some((_, fk, targets)) => {
                fk.constraint.local_columns.push(from);
                targets.push(to);
            }
            None => grouped.push((
                id,
                SqliteForeignKey {
                    constraint: ForeignKeyConstraint::new(vec![from], foreign_table, vec![]),
                    on_update,
                    on_delete,
                },
                vec![to],
            )),
        }
    }

    let mut out = Vec::with_capacity(grouped.len());
    for (_, mut fk, targets) in grouped {
        // REFERENCES parent without columns points at the parent's primary key
        fk.constraint.foreign_columns = if targets.iter().all(Option::is_some) {
            targets.into_iter().flatten().collect()
        } else {
            primary_key_columns(&table_info(conn, &fk.constraint.foreign_table)?)
        };
        out.push(fk);
    }
    out.reverse();
    Ok(out)
}

/// Recreate `table` with one column's NOT NULL flipped.
///
/// Columns, defaults, the primary key, UNIQUE constraints, foreign keys,
/// indexes and triggers are carried over. CHECK constraints and collations
/// are not.
fn rebuild_table(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
    nullable: bool,
) -> Result<()> {
    let columns = table_info(conn, table)?;
    if !columns.iter().any(|c| c.name == column) {
        return Err(MigrateError::missing_column(table, column));
    }

    let create_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    let autoincrement = create_sql
        .map(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"))
        .unwrap_or(false);

    let uniques: Vec<Vec<String>> = index_list(conn, table)?
        .into_iter()
        .filter(|i| i.origin == "u")
        .map(|i| i.index.columns)
        .collect();
    let foreign_keys = foreign_key_list(conn, table)?;

    let extras: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT sql FROM sqlite_master \
             WHERE tbl_name = ?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([table], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let temp = format!("_fregata_rebuild_{}", table);
    let create = create_table_sql(
        &temp,
        &columns,
        column,
        nullable,
        autoincrement,
        &uniques,
        &foreign_keys,
    );
    let names = columns
        .iter()
        .map(|c| quote_double(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let statements = [
        create,
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote_double(&temp),
            names,
            names,
            quote_double(table)
        ),
        format!("DROP TABLE {}", quote_double(table)),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_double(&temp),
            quote_double(table)
        ),
    ];

    // foreign_keys cannot change inside a transaction
    let enforced: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if enforced == 1 {
        conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    }

    let result = (|| -> Result<()> {
        let tx = conn.unchecked_transaction()?;
        for sql in statements.iter().chain(extras.iter()) {
            debug!("{}", sql);
            tx.execute_batch(sql)?;
        }
        tx.commit()?;
        Ok(())
    })();

    if enforced == 1 {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
    }
    result
}

fn create_table_sql(
    table: &str,
    columns: &[ColumnInfo],
    target: &str,
    nullable: bool,
    autoincrement: bool,
    uniques: &[Vec<String>],
    foreign_keys: &[SqliteForeignKey],
) -> String {
    let primary_key = primary_key_columns(columns);
    let inline_pk = primary_key.len() == 1
        && columns
            .iter()
            .any(|c| c.pk == 1 && c.data_type.eq_ignore_ascii_case("INTEGER"));

    let mut parts = Vec::new();
    for c in columns {
        let mut def = quote_double(&c.name);
        if !c.data_type.is_empty() {
            def.push(' ');
            def.push_str(&c.data_type);
        }
        if inline_pk && c.pk == 1 {
            def.push_str(" PRIMARY KEY");
            if autoincrement {
                def.push_str(" AUTOINCREMENT");
            }
        }
        let not_null = if c.name == target { !nullable } else { c.not_null };
        if not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &c.default {
            def.push_str(" DEFAULT ");
            def.push_str(&default_expression(default));
        }
        parts.push(def);
    }

    if !primary_key.is_empty() && !inline_pk {
        parts.push(format!("PRIMARY KEY ({})", quote_list(&primary_key)));
    }
    for columns in uniques {
        parts.push(format!("UNIQUE ({})", quote_list(columns)));
    }
    for fk in foreign_keys {
        let mut def = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_list(&fk.constraint.local_columns),
            quote_double(&fk.constraint.foreign_table),
            quote_list(&fk.constraint.foreign_columns)
        );
        if fk.on_update != "NO ACTION" {
            def.push_str(&format!(" ON UPDATE {}", fk.on_update));
        }
        if fk.on_delete != "NO ACTION" {
            def.push_str(&format!(" ON DELETE {}", fk.on_delete));
        }
        parts.push(def);
    }

    format!("CREATE TABLE {} ({})", quote_double(table), parts.join(", "))
}

/// Defaults holding function calls must be parenthesized in a column definition.
fn default_expression(default: &str) -> String {
    let trimmed = default.trim();
    if trimmed.contains('(') && !trimmed.starts_with('(') && !trimmed.starts_with('\'') {
        format!("({})", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_double(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::I64(v),
        ValueRef::Real(v) => SqlValue::F64(v),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::I64(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::F64(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            // Dates, decimals and UUIDs are stored as text
            other => match other.to_text() {
                Some(text) => ToSqlOutput::Owned(Value::Text(text)),
                None => ToSqlOutput::Owned(Value::Null),
            },
        })
    }
}
