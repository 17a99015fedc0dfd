//! Schema metadata returned by connection introspection.
//!
//! These types are a database-agnostic view of one table: its columns, its
//! indexes and the foreign key constraints it declares.

use serde::{Deserialize, Serialize};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Full type as the database spells it, including length, precision,
    /// scale and sign (`varchar(255)`, `decimal(10,2)`, `int unsigned`).
    pub data_type: String,

    /// Whether the column accepts NULL.
    pub is_nullable: bool,

    /// Default expression, verbatim.
    pub default: Option<String>,

    /// Whether the database generates values for this column.
    pub is_auto_increment: bool,
}

impl Column {
    /// Create a nullable column of the given type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default: None,
            is_auto_increment: false,
        }
    }

    /// A nullable copy of this column under another name, without default
    /// or generated values.
    pub fn shadow(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: self.data_type.clone(),
            is_nullable: true,
            default: None,
            is_auto_increment: false,
        }
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Indexed columns, in key order.
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness.
    pub is_unique: bool,

    /// Whether the index backs the primary key.
    #[serde(default)]
    pub is_primary: bool,
}

impl Index {
    /// A plain, non-unique index.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            is_unique: false,
            is_primary: false,
        }
    }
}

/// A foreign key constraint declared by a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    /// Constraint name, when the database exposes one.
    pub name: Option<String>,

    /// Columns of the declaring table.
    pub local_columns: Vec<String>,

    /// Referenced table.
    pub foreign_table: String,

    /// Referenced columns, paired positionally with `local_columns`.
    pub foreign_columns: Vec<String>,
}

impl ForeignKeyConstraint {
    pub fn new(
        local_columns: Vec<String>,
        foreign_table: impl Into<String>,
        foreign_columns: Vec<String>,
    ) -> Self {
        Self {
            name: None,
            local_columns,
            foreign_table: foreign_table.into(),
            foreign_columns,
        }
    }

    /// Attach a constraint name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Local/foreign column pairs.
    pub fn column_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.local_columns
            .iter()
            .map(String::as_str)
            .zip(self.foreign_columns.iter().map(String::as_str))
    }
}

/// Everything introspection knows about one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDetails {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKeyConstraint>,
}

impl TableDetails {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == name)
    }

    /// Primary key columns, empty when the table has none.
    pub fn primary_key(&self) -> Vec<String> {
        self.indexes
            .iter()
            .find(|i| i.is_primary)
            .map(|i| i.columns.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableDetails {
        TableDetails {
            name: "orders".into(),
            columns: vec![
                Column {
                    name: "id".into(),
                    data_type: "int".into(),
                    is_nullable: false,
                    default: None,
                    is_auto_increment: true,
                },
                Column {
                    name: "amount".into(),
                    data_type: "decimal(10,2)".into(),
                    is_nullable: false,
                    default: Some("0".into()),
                    is_auto_increment: false,
                },
            ],
            indexes: vec![Index {
                name: "orders_pkey".into(),
                columns: vec!["id".into()],
                is_unique: true,
                is_primary: true,
            }],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn test_lookup_helpers() {
        let table = sample_table();
        assert!(table.has_column("amount"));
        assert!(!table.has_column("missing"));
        assert!(table.has_index("orders_pkey"));
        assert_eq!(table.primary_key(), vec!["id".to_string()]);
    }

    #[test]
    fn test_shadow_keeps_type_and_drops_constraints() {
        let table = sample_table();
        let amount = table.column("amount").unwrap();
        let shadow = amount.shadow("_copy");
        assert_eq!(shadow.name, "_copy");
        assert_eq!(shadow.data_type, "decimal(10,2)");
        assert!(shadow.is_nullable);
        assert!(shadow.default.is_none());

        let id = table.column("id").unwrap().shadow("_id_copy");
        assert!(!id.is_auto_increment);
    }

    #[test]
    fn test_column_pairs_zip_positionally() {
        let fk = ForeignKeyConstraint::new(
            vec!["a".into(), "b".into()],
            "parent",
            vec!["x".into(), "y".into()],
        );
        let pairs: Vec<_> = fk.column_pairs().collect();
        assert_eq!(pairs, vec![("a", "x"), ("b", "y")]);
    }
}
