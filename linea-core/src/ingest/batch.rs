use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::warn;

use crate::catalog::{CatalogResult, ContentItem, ContentKind, SqliteCatalogStore};
use crate::config::IngestSection;

/// Destination of batch writes. A trait seam so failure behavior can be
/// exercised without a real database.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn insert_batch(
        &self,
        kind: ContentKind,
        batch_index: usize,
        items: &[ContentItem],
    ) -> CatalogResult<()>;
}

#[async_trait]
impl BatchSink for SqliteCatalogStore {
    async fn insert_batch(
        &self,
        kind: ContentKind,
        _batch_index: usize,
        items: &[ContentItem],
    ) -> CatalogResult<()> {
        SqliteCatalogStore::insert_batch(self, kind, items)
    }
}

/// Shared counters for one batch insert job. `failed_records` only grows
/// once a batch has exhausted every retry.
#[derive(Debug, Clone)]
pub struct InsertStats {
    pub total_records: usize,
    pub inserted_records: usize,
    pub failed_records: usize,
    pub batches_completed: usize,
    started: Instant,
}

impl InsertStats {
    fn new(total_records: usize) -> Self {
        Self {
            total_records,
            inserted_records: 0,
            failed_records: 0,
            batches_completed: 0,
            started: Instant::now(),
        }
    }

    pub fn progress_pct(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.inserted_records as f64 / self.total_records as f64 * 100.0
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records per second over the whole job so far.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.inserted_records as f64 / secs
    }

    pub fn eta(&self) -> Duration {
        let rate = self.rate();
        if rate == 0.0 {
            return Duration::ZERO;
        }
        let remaining = self.total_records.saturating_sub(self.inserted_records);
        Duration::from_secs_f64(remaining as f64 / rate)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff grows by a fixed multiple of the base per attempt:
    /// base, 2×base, 3×base, …
    pub fn compute_delay(&self, attempt: usize) -> Duration {
        self.base_delay * (attempt as u32 + 1)
    }
}

impl From<&IngestSection> for RetryPolicy {
    fn from(section: &IngestSection) -> Self {
        Self {
            attempts: section.max_retries.max(1),
            base_delay: Duration::from_secs(section.retry_base_seconds),
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(&InsertStats) + Send + Sync>;

/// Splits an item list into fixed-size batches and drives them through a
/// bounded pool of concurrent insert tasks. One failed batch is counted,
/// not fatal.
pub struct BatchWriter {
    batch_size: usize,
    workers: usize,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl BatchWriter {
    pub fn new(batch_size: usize, workers: usize, retry: RetryPolicy) -> Self {
        Self {
            batch_size: batch_size.max(1),
            workers: workers.max(1),
            retry,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub async fn write<S: BatchSink>(
        &self,
        sink: &S,
        kind: ContentKind,
        items: &[ContentItem],
    ) -> InsertStats {
        let stats = Arc::new(Mutex::new(InsertStats::new(items.len())));
        if items.is_empty() {
            return snapshot(&stats);
        }

        let batches: Vec<&[ContentItem]> = items.chunks(self.batch_size).collect();
        stream::iter(batches.into_iter().enumerate())
            .for_each_concurrent(self.workers, |(index, batch)| {
                let stats = Arc::clone(&stats);
                async move {
                    let inserted = self.insert_with_retry(sink, kind, index, batch).await;
                    let mut guard = stats.lock().unwrap();
                    if inserted {
                        guard.inserted_records += batch.len();
                    } else {
                        guard.failed_records += batch.len();
                    }
                    guard.batches_completed += 1;
                    if let Some(callback) = &self.progress {
                        callback(&guard);
                    }
                }
            })
            .await;

        snapshot(&stats)
    }

    async fn insert_with_retry<S: BatchSink>(
        &self,
        sink: &S,
        kind: ContentKind,
        batch_index: usize,
        batch: &[ContentItem],
    ) -> bool {
        for attempt in 0..self.retry.attempts {
            match sink.insert_batch(kind, batch_index, batch).await {
                Ok(()) => return true,
                Err(err) if attempt + 1 == self.retry.attempts => {
                    warn!(
                        table = kind.table(),
                        batch = batch_index,
                        attempts = self.retry.attempts,
                        error = %err,
                        "batch insert failed, marking records as failed"
                    );
                    return false;
                }
                Err(err) => {
                    let delay = self.retry.compute_delay(attempt);
                    warn!(
                        table = kind.table(),
                        batch = batch_index,
                        attempt = attempt + 1,
                        wait = ?delay,
                        error = %err,
                        "batch insert failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
        false
    }
}

fn snapshot(stats: &Arc<Mutex<InsertStats>>) -> InsertStats {
    stats.lock().unwrap().clone()
}
