use async_trait::async_trait;
use tracing::{debug, info};

use crate::drivers::ConnectionHandle;
use crate::error::Result;

use super::MigrationContext;

/// Work run once before or after the migrators of a migration.
#[async_trait]
pub trait Task: Send + Sync {
    /// Name shown in logs and progress.
    fn name(&self) -> &str;

    /// Run the task. The returned message, if any, is reported to the user.
    async fn execute(&self, context: &MigrationContext<'_>) -> Result<Option<String>>;
}

/// Runs one SQL statement on a named connection.
pub struct SqlTask {
    connection: ConnectionHandle,
    sql: String,
}

impl SqlTask {
    pub fn new(connection: ConnectionHandle, sql: impl Into<String>) -> Self {
        Self {
            connection,
            sql: sql.into(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[async_trait]
impl Task for SqlTask {
    fn name(&self) -> &str {
        "sql"
    }

    async fn execute(&self, context: &MigrationContext<'_>) -> Result<Option<String>> {
        let connection = self.connection.get().await?;
        debug!("[{}] {}", context.name(), self.sql);

        let affected = connection.execute(&self.sql).await?;
        info!(
            "SQL task on {} affected {} row(s)",
            self.connection.name(),
            affected
        );

        Ok(Some(format!(
            "{} row(s) affected on {}",
            affected,
            self.connection.name()
        )))
    }
}
