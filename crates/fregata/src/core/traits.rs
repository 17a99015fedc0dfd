//! Core traits for database-agnostic migration.
//!
//! - [`Dialect`]: SQL syntax strategy for one database engine
//! - [`Connection`]: a live connection able to introspect, alter and copy
//!
//! # Design Patterns
//!
//! - **Strategy**: each engine provides a `Dialect` that builds its SQL
//! - **Template Method**: `Connection` implements schema changes on top of
//!   `execute` and the dialect builders; engines override only what their SQL
//!   cannot express (SQLite nullability changes)

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MigrateError, Result};

use super::identifier::quote_qualified;
use super::platform::Platform;
use super::schema::{Column, ForeignKeyConstraint, Index, TableDetails};
use super::value::Row;

/// Options for building a paged SELECT.
#[derive(Debug, Clone, Default)]
pub struct SelectQueryOptions {
    /// Table name, optionally schema-qualified.
    pub table: String,
    /// Columns to read; empty means all.
    pub columns: Vec<String>,
    /// Ordering columns. Paging without an order is only stable on some engines.
    pub order_by: Vec<String>,
    /// Maximum rows to return.
    pub limit: Option<usize>,
    /// Rows to skip.
    pub offset: Option<usize>,
}

/// SQL dialect strategy for database-specific syntax.
pub trait Dialect: Send + Sync {
    /// Dialect name.
    fn name(&self) -> &str;

    /// Engine this dialect speaks for.
    fn platform(&self) -> Platform;

    /// Quote an identifier.
    fn quote_ident(&self, name: &str) -> String;

    /// Quote a table name, splitting `schema.table`.
    fn quote_table(&self, name: &str) -> String {
        quote_qualified(name, |part| self.quote_ident(part))
    }

    /// Parameter placeholder for the 1-based `index`.
    fn param_placeholder(&self, index: usize) -> String;

    /// Build a SELECT with optional ordering and paging.
    fn build_select_query(&self, opts: &SelectQueryOptions) -> String;

    /// Build `SELECT COUNT(*)` for a table.
    fn build_count_query(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.quote_table(table))
    }

    /// Build a parameterized single-row INSERT.
    fn build_insert(&self, table: &str, columns: &[String]) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let params = (1..=columns.len())
            .map(|i| self.param_placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_table(table),
            cols,
            params
        )
    }

    /// Column definition as used in ADD COLUMN.
    fn column_definition(&self, column: &Column) -> String {
        let mut def = format!("{} {}", self.quote_ident(&column.name), column.data_type);
        if !column.is_nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }

    fn add_column_sql(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_table(table),
            self.column_definition(column)
        )
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_table(table),
            self.quote_ident(column)
        )
    }

    fn create_index_sql(&self, table: &str, index: &Index) -> String {
        let cols = index
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.is_unique { "UNIQUE " } else { "" },
            self.quote_ident(&index.name),
            self.quote_table(table),
            cols
        )
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String;

    /// Statement changing a column's nullability, `None` when the engine
    /// cannot alter a column in place.
    fn set_nullable_sql(&self, table: &str, column: &Column, nullable: bool) -> Option<String>;
}

/// A live database connection.
///
/// Drivers implement introspection and the three primitive statements
/// (`execute`, `query`, `insert`); schema changes default to running the
/// dialect's DDL through `execute`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Name this connection was configured under.
    fn name(&self) -> &str;

    /// SQL dialect of this connection.
    fn dialect(&self) -> &dyn Dialect;

    /// Engine behind this connection.
    fn platform(&self) -> Platform {
        self.dialect().platform()
    }

    /// Whether foreign key constraints are enforced on this connection.
    async fn supports_foreign_keys(&self) -> Result<bool> {
        Ok(true)
    }

    /// Columns, indexes and foreign keys of a table.
    async fn describe_table(&self, table: &str) -> Result<TableDetails>;

    /// Foreign keys declared by a table.
    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyConstraint>> {
        Ok(self.describe_table(table).await?.foreign_keys)
    }

    /// Run a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a query, returning every row.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Insert one row, binding values as parameters.
    async fn insert(&self, table: &str, row: &Row) -> Result<u64>;

    async fn add_column(&self, table: &str, column: &Column) -> Result<()> {
        let sql = self.dialect().add_column_sql(table, column);
        debug!("{}", sql);
        self.execute(&sql).await?;
        Ok(())
    }

    async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        let sql = self.dialect().drop_column_sql(table, column);
        debug!("{}", sql);
        self.execute(&sql).await?;
        Ok(())
    }

    async fn create_index(&self, table: &str, index: &Index) -> Result<()> {
        let sql = self.dialect().create_index_sql(table, index);
        debug!("{}", sql);
        self.execute(&sql).await?;
        Ok(())
    }

    async fn drop_index(&self, table: &str, index: &str) -> Result<()> {
        let sql = self.dialect().drop_index_sql(table, index);
        debug!("{}", sql);
        self.execute(&sql).await?;
        Ok(())
    }

    /// Make a column nullable or NOT NULL.
    async fn set_nullable(&self, table: &str, column: &Column, nullable: bool) -> Result<()> {
        match self.dialect().set_nullable_sql(table, column, nullable) {
            Some(sql) => {
                debug!("{}", sql);
                self.execute(&sql).await?;
                Ok(())
            }
            None => Err(MigrateError::Unsupported(format!(
                "{} cannot change nullability of {}.{}",
                self.platform(),
                table,
                column.name
            ))),
        }
    }

    /// Count rows of a table.
    async fn count(&self, table: &str) -> Result<u64> {
        let sql = self.dialect().build_count_query(table);
        let rows = self.query(&sql).await?;
        let count = rows
            .first()
            .and_then(|row| row.values().first())
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    /// Release pooled resources.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AnsiDialect;

    impl Dialect for AnsiDialect {
        fn name(&self) -> &str {
            "ansi"
        }

        fn platform(&self) -> Platform {
            Platform::Postgres
        }

        fn quote_ident(&self, name: &str) -> String {
            format!("\"{}\"", name)
        }

        fn param_placeholder(&self, index: usize) -> String {
            format!("${}", index)
        }

        fn build_select_query(&self, _opts: &SelectQueryOptions) -> String {
            String::new()
        }

        fn drop_index_sql(&self, _table: &str, index: &str) -> String {
            format!("DROP INDEX {}", self.quote_ident(index))
        }

        fn set_nullable_sql(&self, _: &str, _: &Column, _: bool) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_default_builders() {
        let d = AnsiDialect;
        assert_eq!(
            d.build_insert("s.t", &["a".into(), "b".into()]),
            "INSERT INTO \"s\".\"t\" (\"a\", \"b\") VALUES ($1, $2)"
        );
        assert_eq!(d.build_count_query("t"), "SELECT COUNT(*) FROM \"t\"");
        assert_eq!(
            d.add_column_sql("t", &Column::new("c", "integer")),
            "ALTER TABLE \"t\" ADD COLUMN \"c\" integer"
        );
        assert_eq!(
            d.create_index_sql("t", &Index::new("i", vec!["c".into()])),
            "CREATE INDEX \"i\" ON \"t\" (\"c\")"
        );
    }

    #[test]
    fn test_column_definition_not_null_default() {
        let d = AnsiDialect;
        let col = Column {
            name: "n".into(),
            data_type: "int".into(),
            is_nullable: false,
            default: Some("0".into()),
            is_auto_increment: false,
        };
        assert_eq!(d.column_definition(&col), "\"n\" int NOT NULL DEFAULT 0");
    }
}
