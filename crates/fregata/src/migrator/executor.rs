use std::collections::VecDeque;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::value::{Batch, Row};
use crate::error::{MigrateError, Result};

/// Produces the rows of a migrator, one batch at a time.
#[async_trait]
pub trait Puller: Send {
    /// Next batch, `None` once exhausted.
    async fn pull(&mut self) -> Result<Option<Batch>>;

    /// Number of rows to expect, when known up front.
    async fn count(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// Consumes the rows of a migrator.
#[async_trait]
pub trait Pusher: Send {
    /// Write one row, returning how many items it counts for.
    async fn push(&mut self, row: Row) -> Result<u64>;
}

/// Moves every row from a puller into a pusher.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the copy to completion.
    ///
    /// `progress` receives the number of items pushed after each batch.
    /// The loop stops with [`MigrateError::Cancelled`] between batches once
    /// `cancel` fires.
    async fn execute(
        &self,
        puller: &mut dyn Puller,
        pusher: &mut dyn Pusher,
        progress: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Default executor: pulls a batch, pushes its rows in order, reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchExecutor;

#[async_trait]
impl Executor for BatchExecutor {
    async fn execute(
        &self,
        puller: &mut dyn Puller,
        pusher: &mut dyn Pusher,
        progress: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut total = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let Some(batch) = puller.pull().await? else {
                break;
            };
            if batch.is_empty() {
                break;
            }

            let mut pushed = 0u64;
            for row in batch {
                pushed += pusher.push(row).await?;
            }

            total += pushed;
            debug!("Pushed {} item(s), {} so far", pushed, total);
            progress(pushed);
        }

        Ok(total)
    }
}

/// Puller over rows held in memory.
#[derive(Debug, Clone)]
pub struct MemoryPuller {
    rows: VecDeque<Row>,
    batch_size: usize,
    total: u64,
}

impl MemoryPuller {
    pub fn new(rows: Vec<Row>) -> Self {
        let total = rows.len() as u64;
        Self {
            rows: rows.into(),
            batch_size: 1000,
            total,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl Puller for MemoryPuller {
    async fn pull(&mut self) -> Result<Option<Batch>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        let take = self.batch_size.min(self.rows.len());
        Ok(Some(self.rows.drain(..take).collect()))
    }

    async fn count(&mut self) -> Result<Option<u64>> {
        Ok(Some(self.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingPusher {
        rows: Vec<Row>,
    }

    #[async_trait]
    impl Pusher for CollectingPusher {
        async fn push(&mut self, row: Row) -> Result<u64> {
            self.rows.push(row);
            Ok(1)
        }
    }

    fn rows(n: i64) -> Vec<Row> {
        (1..=n).map(|i| Row::new().with("id", i)).collect()
    }

    #[tokio::test]
    async fn test_batch_executor_copies_everything_in_order() {
        let mut puller = MemoryPuller::new(rows(5)).with_batch_size(2);
        let mut pusher = CollectingPusher::default();
        let mut increments = Vec::new();

        let total = BatchExecutor
            .execute(
                &mut puller,
                &mut pusher,
                &mut |n| increments.push(n),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(total, 5);
        assert_eq!(increments, vec![2, 2, 1]);
        let ids: Vec<_> = pusher
            .rows
            .iter()
            .map(|r| r.get("id").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_batch_executor_stops_when_cancelled() {
        let mut puller = MemoryPuller::new(rows(3));
        let mut pusher = CollectingPusher::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = BatchExecutor
            .execute(&mut puller, &mut pusher, &mut |_| {}, &cancel)
            .await;

        assert!(matches!(result, Err(MigrateError::Cancelled)));
        assert!(pusher.rows.is_empty());
    }

    #[tokio::test]
    async fn test_memory_puller_count() {
        let mut puller = MemoryPuller::new(rows(4));
        assert_eq!(puller.count().await.unwrap(), Some(4));
        assert_eq!(puller.pull().await.unwrap().map(|b| b.len()), Some(4));
        assert!(puller.pull().await.unwrap().is_none());
    }
}
