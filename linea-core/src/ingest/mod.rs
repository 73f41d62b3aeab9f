mod batch;

pub use batch::{BatchSink, BatchWriter, InsertStats, ProgressCallback, RetryPolicy};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use crate::catalog::{
    CatalogError, ContentKind, FeedParser, SqliteCatalogStore, SyncMetadata,
};
use crate::config::LineaConfig;
use crate::template::{TemplateEngine, TemplateError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("feed download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("feed contains no entries")]
    EmptyFeed,
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("table {table} still has rows after {attempts} delete batches")]
    PurgeExhausted { table: &'static str, attempts: usize },
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassOutcome {
    pub parsed: usize,
    pub inserted: usize,
    pub failed: usize,
    pub rewritten: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub started_at: DateTime<Utc>,
    pub skipped_write: bool,
    pub total_entries: usize,
    pub channels: ClassOutcome,
    pub movies: ClassOutcome,
    pub series: ClassOutcome,
    pub download_secs: f64,
    pub parse_secs: f64,
    pub write_secs: f64,
    pub total_secs: f64,
    pub template_path: String,
    pub template_bytes: u64,
}

impl IngestReport {
    pub fn failed_records(&self) -> usize {
        self.channels.failed + self.movies.failed + self.series.failed
    }
}

/// The single idempotent ingestion entry point: download, classify, diff
/// against the store, purge and rewrite only what changed, publish the
/// placeholder template, record sync metadata.
pub struct IngestPipeline {
    store: SqliteCatalogStore,
    template: Arc<TemplateEngine>,
    parser: FeedParser,
    client: Client,
    config: LineaConfig,
    progress: Option<ProgressCallback>,
}

impl IngestPipeline {
    pub fn new(
        store: SqliteCatalogStore,
        template: Arc<TemplateEngine>,
        config: LineaConfig,
    ) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(
                config.upstream.download_timeout_seconds,
            ))
            .build()?;
        let parser = FeedParser::new(config.playlist.default_logo_url.clone());
        Ok(Self {
            store,
            template,
            parser,
            client,
            config,
            progress: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub async fn run(&self) -> IngestResult<IngestReport> {
        let started = Instant::now();
        let started_at = Utc::now();

        let download_started = Instant::now();
        let feed_text = self.fetch_feed(&self.config.upstream.feed_url).await?;
        let download_secs = download_started.elapsed().as_secs_f64();
        info!(bytes = feed_text.len(), "feed downloaded");

        let parse_started = Instant::now();
        let entries = self.parser.parse(&feed_text);
        if entries.is_empty() {
            return Err(IngestError::EmptyFeed);
        }
        let feed = self.parser.classify_feed(&entries);
        let parse_secs = parse_started.elapsed().as_secs_f64();
        info!(
            channels = feed.channels.len(),
            movies = feed.movies.len(),
            series = feed.series.len(),
            "feed classified"
        );

        let mut outcomes = [
            ClassOutcome {
                parsed: feed.channels.len(),
                ..Default::default()
            },
            ClassOutcome {
                parsed: feed.movies.len(),
                ..Default::default()
            },
            ClassOutcome {
                parsed: feed.series.len(),
                ..Default::default()
            },
        ];

        let mut stale = Vec::new();
        for (slot, kind) in ContentKind::all().iter().enumerate() {
            let stored = self.store.count(*kind)?;
            let parsed = feed.count_for(*kind);
            if stored != parsed {
                info!(table = kind.table(), stored, parsed, "table out of sync");
                stale.push((slot, *kind));
            }
        }

        let write_started = Instant::now();
        let skipped_write = stale.is_empty();
        if skipped_write {
            info!("catalog already in sync, skipping purge and write");
        } else {
            for (slot, kind) in &stale {
                self.purge(*kind).await?;
                let stats = self
                    .batch_writer()
                    .write(&self.store, *kind, feed.items_for(*kind))
                    .await;
                let outcome = &mut outcomes[*slot];
                outcome.inserted = stats.inserted_records;
                outcome.failed = stats.failed_records;
                outcome.rewritten = true;
                if stats.failed_records > 0 {
                    warn!(
                        table = kind.table(),
                        failed = stats.failed_records,
                        "sync completed with failed records"
                    );
                }
            }
        }
        let write_secs = write_started.elapsed().as_secs_f64();

        let template_bytes = self.template.publish(&feed_text)?;
        let template_path = self.template.path().to_string_lossy().into_owned();

        self.store.upsert_metadata(&SyncMetadata {
            last_sync: Some(Utc::now()),
            total_channels: feed.channels.len() as i64,
            total_movies: feed.movies.len() as i64,
            total_series: feed.series.len() as i64,
            channels_with_logo: feed.with_logo.channels,
            movies_with_logo: feed.with_logo.movies,
            series_with_logo: feed.with_logo.series,
            template_path: Some(template_path.clone()),
            template_bytes: Some(template_bytes as i64),
        })?;

        let [channels, movies, series] = outcomes;
        Ok(IngestReport {
            started_at,
            skipped_write,
            total_entries: feed.total(),
            channels,
            movies,
            series,
            download_secs,
            parse_secs,
            write_secs,
            total_secs: started.elapsed().as_secs_f64(),
            template_path,
            template_bytes,
        })
    }

    fn batch_writer(&self) -> BatchWriter {
        let writer = BatchWriter::new(
            self.config.ingest.batch_size,
            self.config.ingest.workers,
            RetryPolicy::from(&self.config.ingest),
        );
        match &self.progress {
            Some(callback) => writer.with_progress(Arc::clone(callback)),
            None => writer,
        }
    }

    /// Whole-table delete first; when that fails, bounded delete batches
    /// with a short pause between them so the store is not hammered.
    async fn purge(&self, kind: ContentKind) -> IngestResult<()> {
        match self.store.truncate(kind) {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(table = kind.table(), error = %err, "truncate failed, falling back to batched deletes");
            }
        }

        let limit = self.config.ingest.delete_batch_size;
        let max_attempts = self.config.ingest.delete_max_attempts;
        let pause = Duration::from_millis(self.config.ingest.delete_pause_ms);
        for _ in 0..max_attempts {
            let deleted = self.store.delete_batch(kind, limit)?;
            if deleted == 0 {
                return Ok(());
            }
            sleep(pause).await;
        }
        if self.store.count(kind)? > 0 {
            return Err(IngestError::PurgeExhausted {
                table: kind.table(),
                attempts: max_attempts,
            });
        }
        Ok(())
    }

    /// `file://` feeds are read straight from disk; everything else goes
    /// through the HTTP client with the configured download timeout.
    async fn fetch_feed(&self, url: &str) -> IngestResult<String> {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| IngestError::InvalidUrl(url.to_string()))?;
                return tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| IngestError::Io { path, source });
            }
        }
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}
