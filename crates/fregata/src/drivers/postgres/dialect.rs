//! PostgreSQL SQL dialect (Strategy pattern).

use crate::core::identifier::quote_double;
use crate::core::platform::Platform;
use crate::core::schema::Column;
use crate::core::traits::{Dialect, SelectQueryOptions};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn platform(&self) -> Platform {
        Platform::Postgres
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
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
        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = opts.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }

    /// Indexes live in the table's schema, not on the table.
    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        let index = match table.rsplit_once('.') {
            Some((schema, _)) => format!("{}.{}", self.quote_table(schema), self.quote_ident(index)),
            None => self.quote_ident(index),
        };
        format!("DROP INDEX {}", index)
    }

    fn set_nullable_sql(&self, table: &str, column: &Column, nullable: bool) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            self.quote_table(table),
            self.quote_ident(&column.name),
            if nullable { "DROP" } else { "SET" }
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_ident("name"), "\"name\"");
        assert_eq!(dialect.quote_ident("table\"name"), "\"table\"\"name\"");
        assert_eq!(dialect.quote_ident("Users"), "\"Users\"");
    }

    #[test]
    fn test_param_placeholder() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.param_placeholder(1), "$1");
        assert_eq!(dialect.param_placeholder(10), "$10");
    }

    #[test]
    fn test_build_select_query_simple() {
        let dialect = PostgresDialect::new();
        let opts = SelectQueryOptions {
            table: "public.users".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            ..Default::default()
        };

        assert_eq!(
            dialect.build_select_query(&opts),
            "SELECT \"id\", \"name\" FROM \"public\".\"users\""
        );
    }

    #[test]
    fn test_build_select_query_paged() {
        let dialect = PostgresDialect::new();
        let opts = SelectQueryOptions {
            table: "users".to_string(),
            columns: vec![],
            order_by: vec!["tenant".to_string(), "id".to_string()],
            limit: Some(1000),
            offset: Some(2000),
        };

        assert_eq!(
            dialect.build_select_query(&opts),
            "SELECT * FROM \"users\" ORDER BY \"tenant\", \"id\" LIMIT 1000 OFFSET 2000"
        );
    }

    #[test]
    fn test_drop_index_follows_schema() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.drop_index_sql("orders", "idx"), "DROP INDEX \"idx\"");
        assert_eq!(
            dialect.drop_index_sql("sales.orders", "idx"),
            "DROP INDEX \"sales\".\"idx\""
        );
    }

    #[test]
    fn test_set_nullable() {
        let dialect = PostgresDialect::new();
        let column = Column::new("customer_id", "integer");
        assert_eq!(
            dialect.set_nullable_sql("orders", &column, true).unwrap(),
            "ALTER TABLE \"orders\" ALTER COLUMN \"customer_id\" DROP NOT NULL"
        );
        assert_eq!(
            dialect.set_nullable_sql("orders", &column, false).unwrap(),
            "ALTER TABLE \"orders\" ALTER COLUMN \"customer_id\" SET NOT NULL"
        );
    }
}
