use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::core::traits::Connection;
use crate::error::Result;
use crate::migration::{MigrationContext, Task};

use super::naming::ShadowNaming;
use super::repair::{build_copied_count, build_identity_fill, build_repair_update, RepairPlan};
use super::{collect_targets, drop_shadow_columns, set_allow_null, ForeignKey, PendingShadows};

/// Rewrites foreign keys once every migrator has copied its rows, then
/// removes what [`ForeignKeyBeforeTask`](super::ForeignKeyBeforeTask) added.
///
/// Foreign keys are handled one at a time: repair, drop the shadow columns
/// no later foreign key needs, restore NOT NULL. A failure leaves the
/// foreign keys already handled in their final state and the others
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct ForeignKeyAfterTask {
    naming: ShadowNaming,
}

impl ForeignKeyAfterTask {
    pub fn new(naming: ShadowNaming) -> Self {
        Self { naming }
    }

    async fn repair(&self, connection: &dyn Connection, fk: &ForeignKey) -> Result<u64> {
        let plan = RepairPlan::new(fk, &self.naming);
        self.fill_untouched(connection, &plan).await?;

        let sql = build_repair_update(connection.dialect(), &plan);
        debug!("{}", sql);

        let updated = connection.execute(&sql).await?;
        if updated == 0 {
            warn!(
                "No row of {} was relinked to {}",
                fk.table_name(),
                fk.foreign_table()
            );
        } else {
            debug!(
                "Relinked {} row(s) of {} to {}",
                updated,
                fk.table_name(),
                fk.foreign_table()
            );
        }
        Ok(updated)
    }

    /// A referenced table no migrator wrote into keeps its keys: its shadow
    /// columns get the current values so references to it match as-is.
    async fn fill_untouched(&self, connection: &dyn Connection, plan: &RepairPlan) -> Result<()> {
        let sql = build_copied_count(connection.dialect(), plan);
        debug!("{}", sql);
        let copied = connection
            .query(&sql)
            .await?
            .first()
            .and_then(|row| row.values().first())
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        if copied > 0 {
            return Ok(());
        }

        let sql = build_identity_fill(connection.dialect(), plan);
        debug!("{}", sql);
        let filled = connection.execute(&sql).await?;
        info!(
            "No row of {} was copied; {} existing key(s) kept as they are",
            plan.foreign_table, filled
        );
        Ok(())
    }
}

#[async_trait]
impl Task for ForeignKeyAfterTask {
    fn name(&self) -> &str {
        "foreign_keys_after"
    }

    async fn execute(&self, context: &MigrationContext<'_>) -> Result<Option<String>> {
        let targets = collect_targets(context.migration(), &self.naming).await?;
        let mut pending = PendingShadows::new(&targets, &self.naming);
        let mut saved = 0u64;

        for target in &targets {
            let connection = target.connection.as_ref();
            for fk in &target.foreign_keys {
                saved += self.repair(connection, fk).await?;

                let referenced = pending.release(
                    connection.name(),
                    fk.foreign_table(),
                    fk.referenced_shadows(&self.naming),
                );
                drop_shadow_columns(connection, fk.foreign_table(), &referenced).await?;

                let referencing = pending.release(
                    connection.name(),
                    fk.table_name(),
                    fk.referencing_shadows(&self.naming),
                );
                drop_shadow_columns(connection, fk.table_name(), &referencing).await?;

                set_allow_null(connection, fk, false).await?;
            }
            debug!("Foreign keys of {} restored", target.migrator);
        }

        info!("{} relation(s) saved", saved);
        Ok(Some(format!("{} relations saved !", format_count(saved))))
    }
}

/// Group digits by thousands with a space: `1234567` -> `1 234 567`.
pub(crate) fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1 000");
        assert_eq!(format_count(1234567), "1 234 567");
    }
}
