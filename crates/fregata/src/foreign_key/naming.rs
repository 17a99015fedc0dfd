//! Names of the temporary columns and indexes carrying old keys.
//!
//! Names are computed, never stored: the Before and After tasks each derive
//! them from `(table, column)` and must agree. The table name is prefixed
//! with its length so that `("a_b", "c")` and `("a", "b_c")` cannot meet on
//! the same name.
//!
//! Names longer than [`MAX_NAME_LENGTH`] bytes keep a truncated head and end
//! with a hash of the full name, so they fit every supported engine.

use sha2::{Digest, Sha256};

/// Reserved prefix of every generated name.
pub const SHADOW_PREFIX: &str = "_fregata_";

/// Longest generated name, in bytes. PostgreSQL keeps 63.
pub const MAX_NAME_LENGTH: usize = 63;

/// Hex digits of the hash ending a shortened name.
const HASH_LENGTH: usize = 16;

/// A shadow column paired with the column it copies and its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShadowColumn {
    /// Column whose values are copied.
    pub original: String,
    /// Shadow column name.
    pub column: String,
    /// Index on the shadow column.
    pub index: String,
}

/// Naming scheme for shadow columns and their indexes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowNaming;

impl ShadowNaming {
    pub fn new() -> Self {
        Self
    }

    /// Column added to a referenced table to hold its old key.
    pub fn referenced_column(&self, table: &str, column: &str) -> String {
        build("referenced", table, column)
    }

    /// Index on [`ShadowNaming::referenced_column`].
    pub fn referenced_index(&self, table: &str, column: &str) -> String {
        build("referenced_idx", table, column)
    }

    /// Column added to a referencing table to hold the old foreign key value.
    pub fn referencing_column(&self, table: &str, column: &str) -> String {
        build("referencing", table, column)
    }

    /// Index on [`ShadowNaming::referencing_column`].
    pub fn referencing_index(&self, table: &str, column: &str) -> String {
        build("referencing_idx", table, column)
    }

    /// Referenced-side shadow for `table.column`.
    pub fn referenced(&self, table: &str, column: &str) -> ShadowColumn {
        ShadowColumn {
            original: column.to_string(),
            column: self.referenced_column(table, column),
            index: self.referenced_index(table, column),
        }
    }

    /// Referencing-side shadow for `table.column`.
    pub fn referencing(&self, table: &str, column: &str) -> ShadowColumn {
        ShadowColumn {
            original: column.to_string(),
            column: self.referencing_column(table, column),
            index: self.referencing_index(table, column),
        }
    }
}

fn build(role: &str, table: &str, column: &str) -> String {
    let full = format!(
        "{}{}_{}_{}_{}",
        SHADOW_PREFIX,
        role,
        table.chars().count(),
        table,
        column
    );
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let mut hasher = Sha256::new();
    hasher.update(full.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    let mut head_len = MAX_NAME_LENGTH - HASH_LENGTH - 1;
    while !full.is_char_boundary(head_len) {
        head_len -= 1;
    }
    format!("{}_{}", &full[..head_len], &digest[..HASH_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SAMPLES: &[(&str, &str)] = &[
        ("users", "id"),
        ("a_b", "c"),
        ("a", "b_c"),
        ("a", "b"),
        ("ab", ""),
        ("", "ab"),
        ("public.orders", "customer_id"),
        ("idx", "1"),
        ("1", "idx"),
        ("ü", "x"),
    ];

    fn all_four(naming: &ShadowNaming, table: &str, column: &str) -> [String; 4] {
        [
            naming.referenced_column(table, column),
            naming.referenced_index(table, column),
            naming.referencing_column(table, column),
            naming.referencing_index(table, column),
        ]
    }

    #[test]
    fn test_names_share_prefix_and_are_pairwise_distinct() {
        let naming = ShadowNaming::new();
        for (table, column) in SAMPLES {
            let names = all_four(&naming, table, column);
            for name in &names {
                assert!(name.starts_with(SHADOW_PREFIX), "{}", name);
            }
            let unique: HashSet<_> = names.iter().collect();
            assert_eq!(unique.len(), 4, "{:?}", names);
        }
    }

    #[test]
    fn test_names_are_injective_across_inputs() {
        let naming = ShadowNaming::new();
        let mut seen = HashSet::new();
        for (table, column) in SAMPLES {
            for name in all_four(&naming, table, column) {
                assert!(seen.insert(name.clone()), "collision on {}", name);
            }
        }
    }

    #[test]
    fn test_names_are_deterministic() {
        let a = ShadowNaming::new();
        let b = ShadowNaming::default();
        assert_eq!(
            a.referencing_column("orders", "customer_id"),
            b.referencing_column("orders", "customer_id")
        );
        assert_eq!(
            a.referenced_column("target_referenced", "pk"),
            "_fregata_referenced_17_target_referenced_pk"
        );
    }

    #[test]
    fn test_long_names_are_shortened_with_a_hash() {
        let naming = ShadowNaming::new();
        let names = all_four(&naming, "customer_addresses", "customer_address_id");
        for name in &names {
            assert!(name.len() <= MAX_NAME_LENGTH, "{}", name);
            assert!(name.starts_with(SHADOW_PREFIX), "{}", name);
        }
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), 4, "{:?}", names);

        assert_eq!(
            naming.referencing_index("customer_addresses", "customer_address_id"),
            naming.referencing_index("customer_addresses", "customer_address_id")
        );
        assert_ne!(
            naming.referencing_column("customer_addresses", "customer_address_id"),
            naming.referencing_column("customer_addresses", "customer_address_ix")
        );

        // Multi-byte characters are never split
        let wide = naming.referenced_column(&"é".repeat(40), "id");
        assert!(wide.len() <= MAX_NAME_LENGTH);
    }

    #[test]
    fn test_short_names_are_kept_whole() {
        let naming = ShadowNaming::new();
        assert_eq!(
            naming.referencing_index("orders", "customer_id"),
            "_fregata_referencing_idx_6_orders_customer_id"
        );
    }

    #[test]
    fn test_shadow_column_groups_names() {
        let naming = ShadowNaming::new();
        let shadow = naming.referencing("orders", "customer_id");
        assert_eq!(shadow.original, "customer_id");
        assert_eq!(shadow.column, naming.referencing_column("orders", "customer_id"));
        assert_eq!(shadow.index, naming.referencing_index("orders", "customer_id"));
    }
}
