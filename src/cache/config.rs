use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tuning for the chunked streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Directory holding session temp files and permanent cache files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,

    /// Content longer than this is "long content"
    pub long_content_threshold_secs: u64,

    /// Content up to this duration is copied to a permanent cache file
    pub cache_duration_limit_secs: u64,

    /// Throughput (bytes/s) that maps to exactly `base_chunk_seconds`
    pub baseline_throughput_bps: f64,

    /// Weight of the newest throughput sample in the moving average
    pub ewma_weight: f64,

    pub min_chunk_bytes: u64,
    pub max_chunk_bytes: u64,

    pub short_min_chunk_secs: u64,
    pub short_max_chunk_secs: u64,
    pub long_min_chunk_secs: u64,
    pub long_max_chunk_secs: u64,

    /// Bitrate assumed when the total length cannot be probed (128 kbit/s)
    pub assumed_bytes_per_second: u64,

    pub head_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,

    /// Consumer asks for more data once its margin drops below this
    pub buffer_ahead_secs: u64,

    pub max_prefetch_chunks: usize,
    pub long_content_prefetch_multiplier: f64,

    /// Extra chunk requests issued by a far-forward seek on long content
    pub seek_burst_chunks: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cache_directory: None,
            long_content_threshold_secs: 20 * 60,
            cache_duration_limit_secs: 30 * 60,
            baseline_throughput_bps: 64_000.0,
            ewma_weight: 0.25,
            min_chunk_bytes: 32_000,
            max_chunk_bytes: 20_000_000,
            short_min_chunk_secs: 10,
            short_max_chunk_secs: 180,
            long_min_chunk_secs: 30,
            long_max_chunk_secs: 300,
            assumed_bytes_per_second: 16_000,
            head_timeout_secs: 5,
            connect_timeout_secs: 10,
            read_timeout_secs: 15,
            buffer_ahead_secs: 60,
            max_prefetch_chunks: 8,
            long_content_prefetch_multiplier: 1.5,
            seek_burst_chunks: 4,
        }
    }
}

impl StreamConfig {
    pub fn cache_directory(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_directory {
            Ok(dir.clone())
        } else {
            default_base_directory().map(|dir| dir.join("streams"))
        }
    }

    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(dir.into());
        self
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_duration_limit_secs == 0 {
            return Err(anyhow::anyhow!(
                "cache_duration_limit_secs must be greater than 0"
            ));
        }

        if !(self.ewma_weight > 0.0 && self.ewma_weight <= 1.0) {
            return Err(anyhow::anyhow!("ewma_weight must be in (0, 1]"));
        }

        if self.baseline_throughput_bps <= 0.0 {
            return Err(anyhow::anyhow!(
                "baseline_throughput_bps must be greater than 0"
            ));
        }

        if self.min_chunk_bytes == 0 || self.min_chunk_bytes > self.max_chunk_bytes {
            return Err(anyhow::anyhow!(
                "chunk byte bounds must satisfy 0 < min_chunk_bytes <= max_chunk_bytes"
            ));
        }

        if self.short_min_chunk_secs > self.short_max_chunk_secs
            || self.long_min_chunk_secs > self.long_max_chunk_secs
        {
            return Err(anyhow::anyhow!("chunk duration bounds are inverted"));
        }

        if self.assumed_bytes_per_second == 0 {
            return Err(anyhow::anyhow!(
                "assumed_bytes_per_second must be greater than 0"
            ));
        }

        if self.max_prefetch_chunks == 0 {
            return Err(anyhow::anyhow!("max_prefetch_chunks must be greater than 0"));
        }

        Ok(())
    }
}

/// Configuration for the process-wide byte-range cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaCacheConfig {
    /// Span budget in megabytes
    pub max_size_mb: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,

    pub request_timeout_secs: u64,

    /// Largest span written by a single network fill
    pub fragment_size_kb: u64,
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 200,
            cache_directory: None,
            request_timeout_secs: 30,
            fragment_size_kb: 2048,
        }
    }
}

impl MediaCacheConfig {
    pub fn cache_directory(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_directory {
            Ok(dir.clone())
        } else {
            default_base_directory().map(|dir| dir.join("media"))
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }

    pub fn fragment_size_bytes(&self) -> u64 {
        self.fragment_size_kb * 1024
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size_mb == 0 {
            return Err(anyhow::anyhow!("max_size_mb must be greater than 0"));
        }

        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "request_timeout_secs must be greater than 0"
            ));
        }

        if self.fragment_size_kb == 0 || self.fragment_size_bytes() > self.max_size_bytes() {
            return Err(anyhow::anyhow!(
                "fragment_size_kb must be non-zero and fit within max_size_mb"
            ));
        }

        Ok(())
    }
}

/// Platform cache directory for this crate
pub fn default_base_directory() -> Result<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let cache_dir = dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Library/Caches")))
            .ok_or_else(|| anyhow::anyhow!("Failed to get cache directory"))?;
        Ok(cache_dir.join("ChunkStream"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        let cache_dir =
            dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Failed to get cache directory"))?;
        Ok(cache_dir.join("chunkstream"))
    }
}
