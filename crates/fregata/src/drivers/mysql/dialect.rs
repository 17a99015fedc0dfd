//! MySQL/MariaDB SQL dialect (Strategy pattern).

use crate::core::identifier::quote_backtick;
use crate::core::platform::Platform;
use crate::core::schema::Column;
use crate::core::traits::{Dialect, SelectQueryOptions};

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// `ALTER TABLE .. MODIFY COLUMN` restating the whole definition.
    ///
    /// MySQL drops every attribute not repeated in MODIFY, so the default,
    /// AUTO_INCREMENT and `ON UPDATE` clause are carried over.
    pub fn modify_column_sql(
        &self,
        table: &str,
        column: &Column,
        nullable: bool,
        on_update: Option<&str>,
    ) -> String {
        let mut def = format!(
            "{} {} {}",
            self.quote_ident(&column.name),
            column.data_type,
            if nullable { "NULL" } else { "NOT NULL" }
        );
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(&default_literal(default));
        }
        if column.is_auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }
        if let Some(expr) = on_update {
            def.push_str(" ON UPDATE ");
            def.push_str(expr);
        }

        format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote_table(table),
            def
        )
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn platform(&self) -> Platform {
        Platform::Mysql
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_backtick(name)
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
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
            // OFFSET is only valid after LIMIT
            (None, Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", u64::MAX, offset))
            }
            (None, None) => {}
        }

        sql
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_ident(index),
            self.quote_table(table)
        )
    }

    fn set_nullable_sql(&self, table: &str, column: &Column, nullable: bool) -> Option<String> {
        Some(self.modify_column_sql(table, column, nullable, None))
    }
}

/// information_schema reports string defaults unquoted.
fn default_literal(default: &str) -> String {
    let upper = default.to_ascii_uppercase();
    let is_keyword = upper == "NULL"
        || upper.starts_with("CURRENT_TIMESTAMP")
        || upper.starts_with("NOW(")
        || upper.starts_with('(');
    let is_quoted = default.starts_with('\'') && default.ends_with('\'') && default.len() > 1;

    if is_keyword || is_quoted || default.parse::<f64>().is_ok() {
        default.to_string()
    } else {
        format!("'{}'", default.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: false,
            default: None,
            is_auto_increment: false,
        }
    }

    #[test]
    fn test_quote_ident() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.quote_ident("users"), "`users`");
        assert_eq!(dialect.quote_ident("my`table"), "`my``table`");
        assert_eq!(dialect.quote_table("shop.users"), "`shop`.`users`");
    }

    #[test]
    fn test_param_placeholder() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.param_placeholder(1), "?");
        assert_eq!(dialect.param_placeholder(9), "?");
    }

    #[test]
    fn test_build_select_query_paged() {
        let dialect = MysqlDialect::new();
        let opts = SelectQueryOptions {
            table: "users".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            order_by: vec!["id".to_string()],
            limit: Some(500),
            offset: Some(1000),
        };

        assert_eq!(
            dialect.build_select_query(&opts),
            "SELECT `id`, `name` FROM `users` ORDER BY `id` LIMIT 500 OFFSET 1000"
        );
    }

    #[test]
    fn test_build_select_query_all_columns() {
        let dialect = MysqlDialect::new();
        let opts = SelectQueryOptions {
            table: "users".to_string(),
            ..Default::default()
        };
        assert_eq!(dialect.build_select_query(&opts), "SELECT * FROM `users`");
    }

    #[test]
    fn test_drop_index_names_table() {
        let dialect = MysqlDialect::new();
        assert_eq!(
            dialect.drop_index_sql("orders", "idx"),
            "DROP INDEX `idx` ON `orders`"
        );
    }

    #[test]
    fn test_modify_column_keeps_attributes() {
        let dialect = MysqlDialect::new();

        let mut status = column("status", "varchar(20)");
        status.default = Some("new".into());
        assert_eq!(
            dialect.set_nullable_sql("orders", &status, true).unwrap(),
            "ALTER TABLE `orders` MODIFY COLUMN `status` varchar(20) NULL DEFAULT 'new'"
        );

        let mut id = column("id", "int unsigned");
        id.is_auto_increment = true;
        assert_eq!(
            dialect.set_nullable_sql("orders", &id, false).unwrap(),
            "ALTER TABLE `orders` MODIFY COLUMN `id` int unsigned NOT NULL AUTO_INCREMENT"
        );

        let mut updated = column("updated_at", "timestamp");
        updated.default = Some("CURRENT_TIMESTAMP".into());
        assert_eq!(
            dialect.modify_column_sql("orders", &updated, false, Some("CURRENT_TIMESTAMP")),
            "ALTER TABLE `orders` MODIFY COLUMN `updated_at` timestamp NOT NULL \
             DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_default_literal() {
        assert_eq!(default_literal("0"), "0");
        assert_eq!(default_literal("1.5"), "1.5");
        assert_eq!(default_literal("NULL"), "NULL");
        assert_eq!(default_literal("it's"), "'it''s'");
        assert_eq!(default_literal("'x'"), "'x'");
    }
}
