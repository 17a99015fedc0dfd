//! MSSQL SQL dialect (Strategy pattern).

use crate::core::identifier::quote_bracket;
use crate::core::platform::Platform;
use crate::core::schema::Column;
use crate::core::traits::{Dialect, SelectQueryOptions};

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn platform(&self) -> Platform {
        Platform::Mssql
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_bracket(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
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

        let order = if opts.order_by.is_empty() {
            None
        } else {
            Some(
                opts.order_by
                    .iter()
                    .map(|c| self.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };

        // OFFSET/FETCH requires SQL Server 2012+ and an ORDER BY
        if opts.limit.is_some() || opts.offset.is_some() {
            let order = order.unwrap_or_else(|| "(SELECT NULL)".to_string());
            sql.push_str(&format!(
                " ORDER BY {} OFFSET {} ROWS",
                order,
                opts.offset.unwrap_or(0)
            ));
            if let Some(limit) = opts.limit {
                sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
            }
        } else if let Some(order) = order {
            sql.push_str(&format!(" ORDER BY {}", order));
        }

        sql
    }

    fn add_column_sql(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD {}",
            self.quote_table(table),
            self.column_definition(column)
        )
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_ident(index),
            self.quote_table(table)
        )
    }

    fn set_nullable_sql(&self, table: &str, column: &Column, nullable: bool) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {}",
            self.quote_table(table),
            self.quote_ident(&column.name),
            column.data_type,
            if nullable { "NULL" } else { "NOT NULL" }
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.quote_ident("name"), "[name]");
        assert_eq!(dialect.quote_ident("table]name"), "[table]]name]");
        assert_eq!(dialect.quote_table("dbo.users"), "[dbo].[users]");
    }

    #[test]
    fn test_param_placeholder() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.param_placeholder(1), "@P1");
        assert_eq!(dialect.param_placeholder(10), "@P10");
    }

    #[test]
    fn test_build_select_query_paged() {
        let dialect = MssqlDialect::new();
        let opts = SelectQueryOptions {
            table: "dbo.users".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            order_by: vec!["id".to_string()],
            limit: Some(1000),
            offset: Some(3000),
        };

        assert_eq!(
            dialect.build_select_query(&opts),
            "SELECT [id], [name] FROM [dbo].[users] ORDER BY [id] \
             OFFSET 3000 ROWS FETCH NEXT 1000 ROWS ONLY"
        );
    }

    #[test]
    fn test_build_select_query_paged_without_order() {
        let dialect = MssqlDialect::new();
        let opts = SelectQueryOptions {
            table: "users".to_string(),
            limit: Some(10),
            ..Default::default()
        };

        assert_eq!(
            dialect.build_select_query(&opts),
            "SELECT * FROM [users] ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_ddl() {
        let dialect = MssqlDialect::new();
        assert_eq!(
            dialect.add_column_sql("orders", &Column::new("copy", "int")),
            "ALTER TABLE [orders] ADD [copy] int"
        );
        assert_eq!(
            dialect.drop_index_sql("orders", "idx"),
            "DROP INDEX [idx] ON [orders]"
        );

        let column = Column::new("customer_id", "bigint");
        assert_eq!(
            dialect.set_nullable_sql("orders", &column, false).unwrap(),
            "ALTER TABLE [orders] ALTER COLUMN [customer_id] bigint NOT NULL"
        );
    }
}
