//! SQLite SQL dialect (Strategy pattern).

use crate::core::identifier::quote_double;
use crate::core::platform::Platform;
use crate::core::schema::Column;
use crate::core::traits::{Dialect, SelectQueryOptions};

/// SQLite dialect implementation.
///
/// SQLite cannot alter a column in place, so [`Dialect::set_nullable_sql`]
/// returns `None` and the connection rebuilds the table instead.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn platform(&self) -> Platform {
        Platform::Sqlite
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn build_select_query(&self, opts: &SelectQueryOptions) -> String {
        let cols = if opts.columns.is_empty() {
            "*".to_string()
        } else {
            opts.columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", cols, self.quote_table(&opts.table));

        if !opts.order_by.is_empty() {
            let order = opts
                .order_by
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", order));
        }

        match (opts.limit, opts.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // OFFSET is only accepted after a LIMIT
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }

    fn drop_index_sql(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote_ident(index))
    }

    fn set_nullable_sql(&self, _table: &str, _column: &Column, _nullable: bool) -> Option<String> {
        None
    }
}
