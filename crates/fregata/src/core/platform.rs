//! Database platform tags and the repair strategy each one resolves to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Database engine behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mysql,
    Postgres,
    Mssql,
    Sqlite,
}

impl Platform {
    /// Parse a platform from a configuration `type` value.
    ///
    /// Accepts the usual aliases ("postgresql", "pg", "sqlserver", "mariadb", ...).
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Platform::Mysql),
            "postgres" | "postgresql" | "pg" => Ok(Platform::Postgres),
            "mssql" | "sqlserver" | "sql_server" => Ok(Platform::Mssql),
            "sqlite" | "sqlite3" => Ok(Platform::Sqlite),
            other => Err(MigrateError::Config(format!(
                "Unknown database type '{}'. Valid values: mysql, postgres, mssql, sqlite",
                other
            ))),
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Mysql => "mysql",
            Platform::Postgres => "postgres",
            Platform::Mssql => "mssql",
            Platform::Sqlite => "sqlite",
        }
    }

    /// How relationships are rewritten after the copy on this platform.
    pub fn repair_strategy(&self) -> RepairStrategy {
        match self {
            Platform::Mysql => RepairStrategy::UpdateJoin,
            Platform::Postgres => RepairStrategy::UpdateFrom,
            Platform::Mssql => RepairStrategy::UpdateFromJoin,
            Platform::Sqlite => RepairStrategy::CorrelatedSubquery,
        }
    }

    /// Default TCP port, `None` for file based engines.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Platform::Mysql => Some(3306),
            Platform::Postgres => Some(5432),
            Platform::Mssql => Some(1433),
            Platform::Sqlite => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of the bulk UPDATE used to rewrite foreign key values.
///
/// Adding an engine means adding a [`Platform`] and mapping it to one of
/// these, or adding a new strategy next to the existing builders in
/// `foreign_key::repair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    /// `UPDATE local INNER JOIN foreign ON ... SET ...`
    UpdateJoin,
    /// `UPDATE local SET ... FROM foreign WHERE ...`
    UpdateFrom,
    /// `UPDATE alias SET ... FROM local alias INNER JOIN foreign ON ...`
    UpdateFromJoin,
    /// One correlated subquery per column, limited to rows carrying shadow values.
    CorrelatedSubquery,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_db_type_aliases() {
        assert_eq!(Platform::from_db_type("PostgreSQL").unwrap(), Platform::Postgres);
        assert_eq!(Platform::from_db_type("pg").unwrap(), Platform::Postgres);
        assert_eq!(Platform::from_db_type("sql_server").unwrap(), Platform::Mssql);
        assert_eq!(Platform::from_db_type("mariadb").unwrap(), Platform::Mysql);
        assert_eq!(Platform::from_db_type("sqlite3").unwrap(), Platform::Sqlite);
        assert!(Platform::from_db_type("oracle").is_err());
    }

    #[test]
    fn test_each_platform_has_a_strategy() {
        assert_eq!(Platform::Mysql.repair_strategy(), RepairStrategy::UpdateJoin);
        assert_eq!(Platform::Postgres.repair_strategy(), RepairStrategy::UpdateFrom);
        assert_eq!(Platform::Mssql.repair_strategy(), RepairStrategy::UpdateFromJoin);
        assert_eq!(
            Platform::Sqlite.repair_strategy(),
            RepairStrategy::CorrelatedSubquery
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Platform::Mssql.to_string(), "mssql");
    }
}
