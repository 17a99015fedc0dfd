use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::migration::{MigrationContext, Task};

use super::naming::ShadowNaming;
use super::{add_shadow_columns, collect_targets, set_allow_null};

/// Prepares target tables before any row is copied.
///
/// For every foreign key declared by a migrator of the migration:
/// - the referenced table gets a shadow column (plus index) per referenced
///   column, to receive the old key of each copied row;
/// - the referencing table gets a shadow column (plus index) per local
///   column, to receive the old foreign key value;
/// - local columns listed as `allow_null` become nullable.
///
/// Shadow columns that already exist are kept, so running the task twice
/// is harmless.
#[derive(Debug, Clone, Default)]
pub struct ForeignKeyBeforeTask {
    naming: ShadowNaming,
}

impl ForeignKeyBeforeTask {
    pub fn new(naming: ShadowNaming) -> Self {
        Self { naming }
    }
}

#[async_trait]
impl Task for ForeignKeyBeforeTask {
    fn name(&self) -> &str {
        "foreign_keys_before"
    }

    async fn execute(&self, context: &MigrationContext<'_>) -> Result<Option<String>> {
        // Every connection is validated before the first ALTER
        let targets = collect_targets(context.migration(), &self.naming).await?;

        let mut created = 0;
        for target in &targets {
            let connection = target.connection.as_ref();
            for fk in &target.foreign_keys {
                created += add_shadow_columns(
                    connection,
                    fk.foreign_table(),
                    &fk.referenced_shadows(&self.naming),
                )
                .await?;
                created += add_shadow_columns(
                    connection,
                    fk.table_name(),
                    &fk.referencing_shadows(&self.naming),
                )
                .await?;
                set_allow_null(connection, fk, true).await?;
            }
        }

        info!(
            "Prepared {} migrator(s) for foreign key preservation ({} shadow column(s) created)",
            targets.len(),
            created
        );

        Ok(None)
    }
}
