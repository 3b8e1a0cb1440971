use anyhow::Result;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::{MediaCacheConfig, StreamCache};
use crate::config::Config;

/// Global cache service instance
static STREAM_CACHE_SERVICE: Lazy<StreamCacheService> = Lazy::new(StreamCacheService::new);

/// Owns the process-wide [`StreamCache`]. The cache is built on first use,
/// torn down by [`release`](Self::release), and built again by the next
/// caller that needs it.
#[derive(Debug)]
pub struct StreamCacheService {
    cache: Mutex<Option<Arc<StreamCache>>>,
}

impl StreamCacheService {
    fn new() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }

    /// Handle to the cache, constructing it from `config` if needed. A cache
    /// that already exists is returned as is, whatever `config` says.
    pub async fn get_handle_with(&self, config: &MediaCacheConfig) -> Result<Arc<StreamCache>> {
        let mut guard = self.cache.lock().await;
        if let Some(cache) = guard.as_ref() {
            return Ok(cache.clone());
        }

        info!("Initializing media cache");
        let cache = Arc::new(StreamCache::new(config.clone()).await?);
        *guard = Some(cache.clone());
        info!("Media cache ready");
        Ok(cache)
    }

    /// Handle to the cache, constructing it from the user config file if needed
    pub async fn get_handle(&self) -> Result<Arc<StreamCache>> {
        {
            let guard = self.cache.lock().await;
            if let Some(cache) = guard.as_ref() {
                return Ok(cache.clone());
            }
        }

        let config = Config::load()?;
        self.get_handle_with(&config.cache).await
    }

    pub async fn is_initialized(&self) -> bool {
        self.cache.lock().await.is_some()
    }

    /// Flush and close the cache. Handles already given out are closed too,
    /// so the next cache built over the same directory is the only one
    /// touching it.
    pub async fn release(&self) -> Result<()> {
        let mut guard = self.cache.lock().await;
        let Some(cache) = guard.take() else {
            return Ok(());
        };

        info!("Releasing media cache");
        info!("{}", cache.format_report().await);
        // closed under the service lock so a rebuild reads the flushed index
        if let Err(e) = cache.close().await {
            warn!("Failed to save span index on release: {}", e);
        }
        Ok(())
    }
}

/// Get the global cache service instance
pub fn stream_cache_service() -> &'static StreamCacheService {
    &STREAM_CACHE_SERVICE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> MediaCacheConfig {
        MediaCacheConfig {
            cache_directory: Some(dir.path().to_path_buf()),
            ..MediaCacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lazy_initialization() {
        let dir = TempDir::new().unwrap();
        let service = StreamCacheService::new();
        assert!(!service.is_initialized().await);

        let first = service.get_handle_with(&config(&dir)).await.unwrap();
        assert!(service.is_initialized().await);

        let second = service.get_handle_with(&config(&dir)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_release_then_reinitialize() {
        let dir = TempDir::new().unwrap();
        let service = StreamCacheService::new();

        let first = service.get_handle_with(&config(&dir)).await.unwrap();
        first
            .store_span("kept", 0, bytes::Bytes::from_static(b"persisted"))
            .await
            .unwrap();

        service.release().await.unwrap();
        assert!(!service.is_initialized().await);
        // releasing twice is harmless
        service.release().await.unwrap();

        let second = service.get_handle_with(&config(&dir)).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.cached_bytes("kept").await, 9);
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_write_after_release() {
        let dir = TempDir::new().unwrap();
        let service = StreamCacheService::new();

        let old = service.get_handle_with(&config(&dir)).await.unwrap();
        service.release().await.unwrap();
        let new = service.get_handle_with(&config(&dir)).await.unwrap();

        assert!(old.is_closed().await);
        assert!(
            old.store_span("a", 0, bytes::Bytes::from_static(b"stale"))
                .await
                .is_err()
        );
        new.store_span("b", 0, bytes::Bytes::from_static(b"fresh"))
            .await
            .unwrap();
        assert!(!new.is_cached("a").await);

        // only the live cache's spans survive another rebuild
        service.release().await.unwrap();
        let reopened = service.get_handle_with(&config(&dir)).await.unwrap();
        assert_eq!(reopened.cached_bytes("b").await, 5);
        assert!(!reopened.is_cached("a").await);
    }

    #[tokio::test]
    async fn test_concurrent_construction_yields_one_cache() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(StreamCacheService::new());
        let config = config(&dir);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let config = config.clone();
            tasks.push(tokio::spawn(async move {
                service.get_handle_with(&config).await.unwrap()
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
