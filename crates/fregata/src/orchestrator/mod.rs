//! Migration orchestrator - runs one migration from start to end.
//!
//! Phases run strictly in sequence:
//!
//! 1. before-tasks, in registration order
//! 2. migrators, in dependency order, each through its executor
//! 3. after-tasks, in registration order
//!
//! The migrator order is computed before the first task runs, so a cycle
//! or an unknown dependency fails the run before any statement is sent.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::migration::{MigrationContext, Task};
use crate::migrator::Migrator;

/// Which task list a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Before,
    After,
}

/// Progress notifications sent while a migration runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    TaskStarted {
        phase: Phase,
        task: String,
    },
    TaskFinished {
        phase: Phase,
        task: String,
        message: Option<String>,
    },
    MigratorStarted {
        migrator: String,
        /// Items to expect, when the puller knows.
        total: Option<u64>,
    },
    /// Items pushed since the previous event for this migrator.
    MigratorProgress {
        migrator: String,
        increment: u64,
    },
    MigratorFinished {
        migrator: String,
        items: u64,
    },
}

/// Items copied by one migrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorResult {
    pub migrator: String,
    pub items: u64,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Migration that ran.
    pub migration: String,

    /// Parent migration, if any.
    pub parent: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Items copied per migrator, in execution order.
    pub migrators: Vec<MigratorResult>,

    /// Total items copied.
    pub items_total: u64,

    /// Messages returned by tasks, in execution order.
    pub messages: Vec<String>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs a migration.
pub struct Orchestrator<'a> {
    context: MigrationContext<'a>,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(context: MigrationContext<'a>) -> Self {
        Self {
            context,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Send progress events to `tx`. A closed receiver is ignored.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Stop between batches and between tasks once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!("Migration {} cancelled", self.context.name());
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }

    /// Run every phase. Errors stop the run where they happen; nothing is
    /// rolled back.
    pub async fn run(self) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let migration = self.context.migration();

        info!("Starting migration {} (run {})", self.context.name(), run_id);

        let migrators = migration.ordered()?;
        let mut messages = Vec::new();

        info!("Phase 1: {} before task(s)", migration.before_tasks().len());
        for task in migration.before_tasks() {
            if let Some(message) = self.run_task(Phase::Before, task.as_ref()).await? {
                messages.push(message);
            }
        }

        info!("Phase 2: {} migrator(s)", migrators.len());
        let mut results = Vec::with_capacity(migrators.len());
        for migrator in migrators {
            results.push(self.run_migrator(migrator).await?);
        }

        info!("Phase 3: {} after task(s)", migration.after_tasks().len());
        for task in migration.after_tasks() {
            if let Some(message) = self.run_task(Phase::After, task.as_ref()).await? {
                messages.push(message);
            }
        }

        let items_total = results.iter().map(|r| r.items).sum();
        let result = MigrationResult {
            run_id,
            migration: self.context.name().to_string(),
            parent: self.context.parent().map(str::to_string),
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            migrators: results,
            items_total,
            messages,
        };

        info!(
            "Migration {} completed: {} item(s) in {:.1}s",
            result.migration, result.items_total, result.duration_seconds
        );

        Ok(result)
    }

    async fn run_task(&self, phase: Phase, task: &dyn Task) -> Result<Option<String>> {
        self.check_cancelled()?;
        let name = task.name().to_string();
        self.emit(ProgressEvent::TaskStarted {
            phase,
            task: name.clone(),
        });

        let message = task.execute(&self.context).await?;
        if let Some(message) = &message {
            info!("{}: {}", name, message);
        }

        self.emit(ProgressEvent::TaskFinished {
            phase,
            task: name,
            message: message.clone(),
        });
        Ok(message)
    }

    async fn run_migrator(&self, migrator: &dyn Migrator) -> Result<MigratorResult> {
        self.check_cancelled()?;
        let id = migrator.id().to_string();

        let mut puller = migrator.puller().await?;
        let mut pusher = migrator.pusher().await?;
        let total = puller.count().await?;

        info!("Migrating {}", id);
        self.emit(ProgressEvent::MigratorStarted {
            migrator: id.clone(),
            total,
        });

        let progress = self.progress.clone();
        let progress_id = id.clone();
        let mut on_progress = move |increment: u64| {
            if let Some(tx) = &progress {
                let _ = tx.send(ProgressEvent::MigratorProgress {
                    migrator: progress_id.clone(),
                    increment,
                });
            }
        };

        let items = migrator
            .executor()
            .execute(
                puller.as_mut(),
                pusher.as_mut(),
                &mut on_progress,
                &self.cancel,
            )
            .await?;

        info!("Migrated {}: {} item(s)", id, items);
        self.emit(ProgressEvent::MigratorFinished {
            migrator: id.clone(),
            items,
        });

        Ok(MigratorResult {
            migrator: id,
            items,
        })
    }
}
