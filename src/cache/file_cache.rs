use anyhow::Context;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::chunk_downloader::ChunkDownloader;
use super::config::MediaCacheConfig;
use super::data_source::{CacheMode, DataSourceFactory};
use super::stats::CacheStats;
use super::storage::{InsertOutcome, SpanStorage};
use crate::utils::errors::{StreamError, StreamResult};

/// Process-wide byte-range cache. Obtain one through
/// [`StreamCacheService`](crate::services::cache_service::StreamCacheService).
///
/// All span bookkeeping happens under one lock; network fills run outside it.
/// Once [`close`](Self::close) has run the storage is gone: queries report an
/// empty cache and every read or write fails with [`StreamError::Cache`].
#[derive(Debug)]
pub struct StreamCache {
    config: MediaCacheConfig,
    storage: Mutex<Option<SpanStorage>>,
    downloader: ChunkDownloader,
    stats: CacheStats,
}

impl StreamCache {
    pub async fn new(config: MediaCacheConfig) -> anyhow::Result<Self> {
        let max_size = config.max_size_bytes();
        Self::with_max_size(config, max_size).await
    }

    /// Construct with an explicit byte budget instead of `max_size_mb`
    pub async fn with_max_size(config: MediaCacheConfig, max_size: u64) -> anyhow::Result<Self> {
        config.validate()?;
        let cache_dir = config.cache_directory()?;
        let storage = SpanStorage::open(cache_dir, max_size).await?;

        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .read_timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client for media cache")?;

        Ok(Self {
            config,
            storage: Mutex::new(Some(storage)),
            downloader: ChunkDownloader::new(client),
            stats: CacheStats::new(),
        })
    }

    /// Builder for data sources reading through this cache
    pub fn data_source_factory(self: &Arc<Self>, mode: CacheMode) -> DataSourceFactory {
        DataSourceFactory::new(self.clone(), mode)
    }

    pub async fn is_cached(&self, key: &str) -> bool {
        self.storage
            .lock()
            .await
            .as_ref()
            .is_some_and(|storage| storage.is_cached(key))
    }

    pub async fn cached_bytes(&self, key: &str) -> u64 {
        self.storage
            .lock()
            .await
            .as_ref()
            .map_or(0, |storage| storage.cached_bytes(key))
    }

    pub async fn remove_from_cache(&self, key: &str) -> StreamResult<()> {
        let mut guard = self.storage.lock().await;
        let storage = guard.as_mut().ok_or_else(released)?;
        let freed = storage.remove_key(key).await.map_err(cache_error)?;
        info!("Removed {} from cache, freed {} bytes", key, freed);
        Ok(())
    }

    pub async fn clear_cache(&self) -> StreamResult<()> {
        let mut guard = self.storage.lock().await;
        let storage = guard.as_mut().ok_or_else(released)?;
        storage.clear().await.map_err(cache_error)
    }

    /// Flush the span index to disk
    pub async fn save(&self) -> StreamResult<()> {
        let guard = self.storage.lock().await;
        let storage = guard.as_ref().ok_or_else(released)?;
        storage.save().await.map_err(cache_error)
    }

    /// Flush the index and give up the cache directory. Closing twice is a no-op.
    pub async fn close(&self) -> StreamResult<()> {
        let Some(storage) = self.storage.lock().await.take() else {
            return Ok(());
        };
        storage.save().await.map_err(cache_error)
    }

    pub async fn is_closed(&self) -> bool {
        self.storage.lock().await.is_none()
    }

    pub async fn total_size(&self) -> u64 {
        self.storage
            .lock()
            .await
            .as_ref()
            .map_or(0, |storage| storage.total_size())
    }

    pub async fn format_report(&self) -> String {
        let guard = self.storage.lock().await;
        let (size, spans) = guard
            .as_ref()
            .map_or((0, 0), |storage| (storage.total_size(), storage.span_count()));
        self.stats.format_report(size, spans)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn config(&self) -> &MediaCacheConfig {
        &self.config
    }

    pub(crate) fn downloader(&self) -> &ChunkDownloader {
        &self.downloader
    }

    /// Cached bytes at `position`, at most `max_len` of them
    pub(crate) async fn read_cached(
        &self,
        key: &str,
        position: u64,
        max_len: u64,
    ) -> StreamResult<Option<Bytes>> {
        let data = {
            let mut guard = self.storage.lock().await;
            let storage = guard.as_mut().ok_or_else(released)?;
            storage
                .read_span(key, position, max_len)
                .await
                .map_err(cache_error)?
        };

        Ok(data.map(|data| {
            self.stats.record_hit(data.len() as u64);
            Bytes::from(data)
        }))
    }

    /// Where the next cached span of `key` begins, so a network fill can stop there
    pub(crate) async fn next_cached_start(&self, key: &str, position: u64) -> Option<u64> {
        self.storage
            .lock()
            .await
            .as_ref()
            .and_then(|storage| storage.next_span_start(key, position))
    }

    pub(crate) async fn store_span(&self, key: &str, position: u64, data: Bytes) -> StreamResult<()> {
        let outcome = {
            let mut guard = self.storage.lock().await;
            let storage = guard.as_mut().ok_or_else(released)?;
            storage
                .insert_span(key, position, &data)
                .await
                .map_err(cache_error)?
        };

        match outcome {
            InsertOutcome::Stored { evicted } => {
                if evicted > 0 {
                    self.stats.add_evictions(evicted as u64);
                }
            }
            InsertOutcome::Overlapping | InsertOutcome::Empty => {}
            InsertOutcome::TooLarge => {
                warn!("Span {}@{} larger than cache budget", key, position);
            }
        }
        debug!("Committed {} bytes of {} at {}", data.len(), key, position);
        Ok(())
    }

    pub(crate) fn record_network_fill(&self, bytes: u64) {
        self.stats.record_miss(bytes);
    }
}

fn cache_error(e: anyhow::Error) -> StreamError {
    StreamError::Cache(format!("{:#}", e))
}

fn released() -> StreamError {
    StreamError::Cache("media cache has been released".to_string())
}
