//! Identifier validation and quoting.
//!
//! SQL identifiers (table, column and index names) cannot be bound as
//! parameters, so every generated statement quotes them through the
//! functions here. Shadow column and index names are additionally checked
//! against the engine's identifier length limit: PostgreSQL silently
//! truncates long names, which would make two distinct shadow names collide.

use crate::core::platform::Platform;
use crate::error::{MigrateError, Result};

/// Longest identifier each engine keeps intact.
/// - PostgreSQL: 63 bytes (NAMEDATALEN - 1)
/// - MySQL: 64 characters
/// - SQL Server: 128 characters
/// - SQLite: no limit
pub fn max_identifier_length(platform: Platform) -> Option<usize> {
    match platform {
        Platform::Postgres => Some(63),
        Platform::Mysql => Some(64),
        Platform::Mssql => Some(128),
        Platform::Sqlite => None,
    }
}

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers and identifiers containing null bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    Ok(())
}

/// Check a generated identifier against the platform limit.
///
/// PostgreSQL counts bytes, the others count characters.
pub fn check_length(name: &str, platform: Platform) -> Result<()> {
    validate_identifier(name)?;

    let Some(max) = max_identifier_length(platform) else {
        return Ok(());
    };
    let length = match platform {
        Platform::Postgres => name.len(),
        _ => name.chars().count(),
    };

    if length > max {
        return Err(MigrateError::IdentifierTooLong {
            identifier: name.to_string(),
            length,
            max,
            platform,
        });
    }
    Ok(())
}

/// Quote with double quotes (PostgreSQL, SQLite).
pub fn quote_double(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote with backticks (MySQL).
pub fn quote_backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote with brackets (SQL Server).
pub fn quote_bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a possibly schema-qualified table name (`schema.table`) part by part.
pub fn quote_qualified(name: &str, quote: impl Fn(&str) -> String) -> String {
    name.split('.').map(quote).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty_and_null_byte() {
        assert!(validate_identifier("")
            .unwrap_err()
            .to_string()
            .contains("empty"));
        assert!(validate_identifier("table\0name")
            .unwrap_err()
            .to_string()
            .contains("null byte"));
    }

    #[test]
    fn test_check_length_postgres_counts_bytes() {
        let ascii = "a".repeat(63);
        assert!(check_length(&ascii, Platform::Postgres).is_ok());

        let too_long = "a".repeat(64);
        match check_length(&too_long, Platform::Postgres) {
            Err(MigrateError::IdentifierTooLong { length, max, .. }) => {
                assert_eq!(length, 64);
                assert_eq!(max, 63);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // 32 two-byte characters: 64 bytes
        let wide = "é".repeat(32);
        assert!(check_length(&wide, Platform::Postgres).is_err());
        assert!(check_length(&wide, Platform::Mysql).is_ok());
    }

    #[test]
    fn test_check_length_sqlite_is_unbounded() {
        assert!(check_length(&"a".repeat(1000), Platform::Sqlite).is_ok());
    }

    #[test]
    fn test_quoting_escapes_delimiters() {
        assert_eq!(quote_double("table\"name"), "\"table\"\"name\"");
        assert_eq!(quote_backtick("table`name"), "`table``name`");
        assert_eq!(quote_bracket("table]name"), "[table]]name]");
        assert_eq!(
            quote_double("Robert'); DROP TABLE Students;--"),
            "\"Robert'); DROP TABLE Students;--\""
        );
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("dbo.users", quote_bracket), "[dbo].[users]");
        assert_eq!(quote_qualified("users", quote_double), "\"users\"");
    }
}
