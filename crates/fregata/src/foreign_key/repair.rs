//! Bulk UPDATE statements rewriting foreign keys to regenerated keys.
//!
//! Every strategy joins the referencing table (`_l`) to the referenced table
//! (`_f`) on all shadow column pairs at once and copies the real referenced
//! columns into the real referencing columns. Rows whose shadow columns are
//! NULL (rows that were already in the target before the run) never match.

use crate::core::platform::RepairStrategy;
use crate::core::traits::Dialect;

use super::naming::ShadowNaming;
use super::ForeignKey;

const LOCAL_ALIAS: &str = "_l";
const FOREIGN_ALIAS: &str = "_f";

/// One column pair of a foreign key with both shadow columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairColumn {
    pub local: String,
    pub foreign: String,
    pub local_copy: String,
    pub foreign_copy: String,
}

/// Everything needed to rewrite one foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPlan {
    pub local_table: String,
    pub foreign_table: String,
    pub columns: Vec<RepairColumn>,
}

impl RepairPlan {
    pub fn new(fk: &ForeignKey, naming: &ShadowNaming) -> Self {
        let columns = fk
            .constraint()
            .column_pairs()
            .map(|(local, foreign)| RepairColumn {
                local: local.to_string(),
                foreign: foreign.to_string(),
                local_copy: naming.referencing_column(fk.table_name(), local),
                foreign_copy: naming.referenced_column(fk.foreign_table(), foreign),
            })
            .collect();

        Self {
            local_table: fk.table_name().to_string(),
            foreign_table: fk.foreign_table().to_string(),
            columns,
        }
    }
}

/// Count referenced rows carrying an old key. Zero means no migrator wrote
/// into the referenced table during the run.
pub fn build_copied_count(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    let condition = plan
        .columns
        .iter()
        .map(|c| format!("{} IS NOT NULL", dialect.quote_ident(&c.foreign_copy)))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        dialect.quote_table(&plan.foreign_table),
        condition
    )
}

/// Fill the referenced shadow columns with the current keys, for tables
/// whose keys are unchanged by the run.
pub fn build_identity_fill(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    let assignments = plan
        .columns
        .iter()
        .map(|c| {
            format!(
                "{} = {}",
                dialect.quote_ident(&c.foreign_copy),
                dialect.quote_ident(&c.foreign)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {}",
        dialect.quote_table(&plan.foreign_table),
        assignments
    )
}

/// Build the repair statement for the dialect's platform.
pub fn build_repair_update(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    match dialect.platform().repair_strategy() {
        RepairStrategy::UpdateJoin => update_join(dialect, plan),
        RepairStrategy::UpdateFrom => update_from(dialect, plan),
        RepairStrategy::UpdateFromJoin => update_from_join(dialect, plan),
        RepairStrategy::CorrelatedSubquery => correlated_subquery(dialect, plan),
    }
}

/// `_l.copy = _f.copy AND ...`
fn join_condition(dialect: &dyn Dialect, plan: &RepairPlan, local: &str) -> String {
    plan.columns
        .iter()
        .map(|c| {
            format!(
                "{}.{} = {}.{}",
                local,
                dialect.quote_ident(&c.local_copy),
                FOREIGN_ALIAS,
                dialect.quote_ident(&c.foreign_copy)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn qualified_assignments(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    plan.columns
        .iter()
        .map(|c| {
            format!(
                "{}.{} = {}.{}",
                LOCAL_ALIAS,
                dialect.quote_ident(&c.local),
                FOREIGN_ALIAS,
                dialect.quote_ident(&c.foreign)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn update_join(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    format!(
        "UPDATE {} {} INNER JOIN {} {} ON {} SET {}",
        dialect.quote_table(&plan.local_table),
        LOCAL_ALIAS,
        dialect.quote_table(&plan.foreign_table),
        FOREIGN_ALIAS,
        join_condition(dialect, plan, LOCAL_ALIAS),
        qualified_assignments(dialect, plan)
    )
}

fn update_from(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    // SET targets cannot be qualified here
    let assignments = plan
        .columns
        .iter()
        .map(|c| {
            format!(
                "{} = {}.{}",
                dialect.quote_ident(&c.local),
                FOREIGN_ALIAS,
                dialect.quote_ident(&c.foreign)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {} AS {} SET {} FROM {} AS {} WHERE {}",
        dialect.quote_table(&plan.local_table),
        LOCAL_ALIAS,
        assignments,
        dialect.quote_table(&plan.foreign_table),
        FOREIGN_ALIAS,
        join_condition(dialect, plan, LOCAL_ALIAS)
    )
}

fn update_from_join(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    format!(
        "UPDATE {} SET {} FROM {} AS {} INNER JOIN {} AS {} ON {}",
        LOCAL_ALIAS,
        qualified_assignments(dialect, plan),
        dialect.quote_table(&plan.local_table),
        LOCAL_ALIAS,
        dialect.quote_table(&plan.foreign_table),
        FOREIGN_ALIAS,
        join_condition(dialect, plan, LOCAL_ALIAS)
    )
}

fn correlated_subquery(dialect: &dyn Dialect, plan: &RepairPlan) -> String {
    let local = dialect.quote_table(&plan.local_table);
    let foreign = dialect.quote_table(&plan.foreign_table);
    let condition = join_condition(dialect, plan, &local);

    let assignments = plan
        .columns
        .iter()
        .map(|c| {
            format!(
                "{} = (SELECT {}.{} FROM {} AS {} WHERE {})",
                dialect.quote_ident(&c.local),
                FOREIGN_ALIAS,
                dialect.quote_ident(&c.foreign),
                foreign,
                FOREIGN_ALIAS,
                condition
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let touched = plan
        .columns
        .iter()
        .map(|c| format!("{}.{} IS NOT NULL", local, dialect.quote_ident(&c.local_copy)))
        .collect::<Vec<_>>()
        .join(" OR ");

    // Rows without a match keep their value instead of becoming NULL
    format!(
        "UPDATE {} SET {} WHERE ({}) AND EXISTS (SELECT 1 FROM {} AS {} WHERE {})",
        local, assignments, touched, foreign, FOREIGN_ALIAS, condition
    )
}
