use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::config::{Markers, SchedulerConfig};
use crate::fetcher::Fetcher;
use crate::gate::ConcurrencyGate;
use crate::models::{FailureReason, Field, Outcome, ResultTable, WorkItem};
use crate::utils::Result;

/// Called after every chunk of a chunked run with the whole table so far.
#[async_trait]
pub trait ChunkListener: Send + Sync {
    async fn on_chunk_complete(&self, table: &ResultTable) -> Result<()>;
}

/// Fans fetch tasks out over one shared gate and gathers exactly one terminal
/// outcome per input item, in input order.
pub struct BatchScheduler {
    fetcher: Arc<Fetcher>,
    config: SchedulerConfig,
    markers: Markers,
    gate: ConcurrencyGate,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(fetcher: Arc<Fetcher>, config: SchedulerConfig, markers: Markers) -> Self {
        let gate = ConcurrencyGate::new(config.max_concurrency);
        Self {
            fetcher,
            config,
            markers,
            gate,
            cancel: CancellationToken::new(),
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Token that stops the run when cancelled. Clones share state.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop starting attempts and retries. In-flight attempts close their
    /// pages and give back their permits.
    pub fn cancel(&self) {
        tracing::warn!("Batch cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run every item to a terminal outcome. Always returns a table with one
    /// row per item.
    pub async fn run_batch(&self, items: &[WorkItem]) -> ResultTable {
        let mut table = ResultTable::with_placeholders(items, &self.markers);
        self.run_range(items, 0, &mut table).await;
        table
    }

    /// Like [`run_batch`](Self::run_batch), but in sequential chunks of
    /// `chunk_size` items with `listener` notified after each one. A listener
    /// error ends the run.
    pub async fn run_chunked(&self, items: &[WorkItem], listener: &dyn ChunkListener) -> Result<ResultTable> {
        let mut table = ResultTable::with_placeholders(items, &self.markers);
        let chunk_size = self.config.chunk_size.unwrap_or(items.len()).max(1);
        let chunk_count = items.len().div_ceil(chunk_size);

        for (number, chunk) in items.chunks(chunk_size).enumerate() {
            if self.is_cancelled() {
                tracing::warn!("Cancelled before chunk {}/{}", number + 1, chunk_count);
                break;
            }

            let offset = number * chunk_size;
            tracing::info!(
                "Processing chunk {}/{} (items {}-{})",
                number + 1,
                chunk_count,
                offset + 1,
                offset + chunk.len()
            );
            self.run_range(chunk, offset, &mut table).await;
            listener.on_chunk_complete(&table).await?;
        }

        Ok(table)
    }

    async fn run_range(&self, items: &[WorkItem], offset: usize, table: &mut ResultTable) {
        let mut tasks = JoinSet::new();

        for (position, item) in items.iter().enumerate() {
            let index = offset + position;
            let fetcher = Arc::clone(&self.fetcher);
            let gate = self.gate.clone();
            let cancel = self.cancel.clone();
            let config = self.config.clone();
            let item = item.clone();

            tasks.spawn(async move {
                let (outcome, attempts) = run_item(&fetcher, &gate, &item, &config, &cancel).await;
                log_outcome(&item.url, &outcome, attempts);
                (index, outcome, attempts)
            });
        }

        let total = items.len();
        let mut finished = 0;
        while let Some(joined) = tasks.join_next().await {
            finished += 1;
            match joined {
                Ok((_, Outcome::Failed(FailureReason::Cancelled), _)) => {
                    // Unfinished rows keep their placeholder
                }
                Ok((index, outcome, attempts)) => {
                    table.record(index, outcome, attempts);
                }
                Err(e) => {
                    tracing::error!("Fetch task aborted, its row keeps the failure marker: {}", e);
                }
            }
            tracing::debug!("Progress: {}/{}", finished, total);
        }
    }
}

/// Retry loop for one item. One permit per attempt; backoff sleeps hold none.
async fn run_item(
    fetcher: &Fetcher,
    gate: &ConcurrencyGate,
    item: &WorkItem,
    config: &SchedulerConfig,
    cancel: &CancellationToken,
) -> (Outcome, u32) {
    let mut attempts = 0;

    loop {
        attempts += 1;
        let deadline = Instant::now() + config.acquire_timeout();
        let outcome = fetcher.fetch(gate, item, deadline, cancel).await;

        if !outcome.should_retry() || attempts > config.max_retries || cancel.is_cancelled() {
            return (outcome, attempts);
        }

        let backoff = config.retry_backoff_ms.sample();
        if let Outcome::Failed(reason) = &outcome {
            tracing::warn!(
                "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                attempts,
                config.max_retries + 1,
                item.url,
                reason,
                backoff
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => return (outcome, attempts),
            _ = sleep(backoff) => {}
        }
    }
}

fn log_outcome(url: &str, outcome: &Outcome, attempts: u32) {
    match outcome {
        Outcome::Success(result) => tracing::info!(
            "Scraped {} | {} | {} -> {} (attempt {})",
            url,
            result.text(Field::Name).unwrap_or_default(),
            result.text(Field::OriginalPrice).unwrap_or_default(),
            result.text(Field::DiscountedPrice).unwrap_or_default(),
            attempts
        ),
        Outcome::SkippedClosedStore => tracing::info!("Store closed, skipped {}", url),
        Outcome::Failed(FailureReason::Cancelled) => tracing::debug!("Cancelled {}", url),
        Outcome::Failed(reason) => {
            tracing::error!("Giving up on {} after {} attempt(s): {}", url, attempts, reason)
        }
    }
}
