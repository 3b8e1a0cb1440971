use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for the chunked streaming manager
#[derive(Debug, Clone)]
pub struct DownloaderStats {
    pub sessions_started: Arc<AtomicU64>,
    pub sessions_completed: Arc<AtomicU64>,
    pub sessions_failed: Arc<AtomicU64>,
    pub sessions_cancelled: Arc<AtomicU64>,
    /// Sessions answered straight from a permanent cache file
    pub cache_file_hits: Arc<AtomicU64>,
    pub chunks_fetched: Arc<AtomicU64>,
    /// Continue signals a consumer asked for (before conflation)
    pub chunk_requests: Arc<AtomicU64>,
    /// Full-download fallbacks after a refused range
    pub range_fallbacks: Arc<AtomicU64>,
    pub total_bytes_downloaded: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Default for DownloaderStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloaderStats {
    pub fn new() -> Self {
        Self {
            sessions_started: Arc::new(AtomicU64::new(0)),
            sessions_completed: Arc::new(AtomicU64::new(0)),
            sessions_failed: Arc::new(AtomicU64::new(0)),
            sessions_cancelled: Arc::new(AtomicU64::new(0)),
            cache_file_hits: Arc::new(AtomicU64::new(0)),
            chunks_fetched: Arc::new(AtomicU64::new(0)),
            chunk_requests: Arc::new(AtomicU64::new(0)),
            range_fallbacks: Arc::new(AtomicU64::new(0)),
            total_bytes_downloaded: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn increment_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cancelled(&self) {
        self.sessions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_file_hit(&self) {
        self.cache_file_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_chunks(&self) {
        self.chunks_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_chunk_requests(&self, count: u64) {
        self.chunk_requests.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_fallbacks(&self) {
        self.range_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_downloaded(&self, bytes: u64) {
        self.total_bytes_downloaded
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn chunk_requests(&self) -> u64 {
        self.chunk_requests.load(Ordering::Relaxed)
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.load(Ordering::Relaxed)
    }

    pub fn sessions_failed(&self) -> u64 {
        self.sessions_failed.load(Ordering::Relaxed)
    }

    pub fn sessions_cancelled(&self) -> u64 {
        self.sessions_cancelled.load(Ordering::Relaxed)
    }

    pub fn cache_file_hits(&self) -> u64 {
        self.cache_file_hits.load(Ordering::Relaxed)
    }

    pub fn range_fallbacks(&self) -> u64 {
        self.range_fallbacks.load(Ordering::Relaxed)
    }

    pub fn format_report(&self, avg_throughput_bps: f64) -> String {
        let uptime_secs = self.start_time.elapsed().as_secs();
        let hours = uptime_secs / 3600;
        let minutes = (uptime_secs % 3600) / 60;
        let seconds = uptime_secs % 60;

        let total_mb =
            self.total_bytes_downloaded.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0);

        let mut report = format!(
            "Streaming Stats [{}h {}m {}s] | Sessions: {} | Completed: {} | Failed: {} | Cancelled: {} | Total: {:.1} MB | Throughput: {:.1} KB/s",
            hours,
            minutes,
            seconds,
            self.sessions_started.load(Ordering::Relaxed),
            self.sessions_completed.load(Ordering::Relaxed),
            self.sessions_failed.load(Ordering::Relaxed),
            self.sessions_cancelled.load(Ordering::Relaxed),
            total_mb,
            avg_throughput_bps / 1024.0
        );

        let fallbacks = self.range_fallbacks.load(Ordering::Relaxed);
        let cache_hits = self.cache_file_hits.load(Ordering::Relaxed);
        report.push_str(&format!(
            "\n   Chunks: {} | Requests: {} | Fallbacks: {} | Cache files: {}",
            self.chunks_fetched.load(Ordering::Relaxed),
            self.chunk_requests.load(Ordering::Relaxed),
            fallbacks,
            cache_hits
        ));

        report
    }
}

/// Counters for the byte-range cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: Arc<AtomicU64>,
    pub misses: Arc<AtomicU64>,
    pub bytes_served_from_cache: Arc<AtomicU64>,
    pub bytes_fetched: Arc<AtomicU64>,
    pub evicted_spans: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            bytes_served_from_cache: Arc::new(AtomicU64::new(0)),
            bytes_fetched: Arc::new(AtomicU64::new(0)),
            evicted_spans: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_hit(&self, bytes: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_served_from_cache
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_miss(&self, bytes: u64) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_evictions(&self, count: u64) {
        self.evicted_spans.fetch_add(count, Ordering::Relaxed);
    }

    pub fn format_report(&self, current_size: u64, span_count: usize) -> String {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            (hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        format!(
            "Cache Stats | Hit Rate: {:.1}% | Spans: {} | Size: {:.1} MB | From cache: {:.1} MB | Fetched: {:.1} MB | Evicted: {}",
            hit_rate,
            span_count,
            current_size as f64 / (1024.0 * 1024.0),
            self.bytes_served_from_cache.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0),
            self.bytes_fetched.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0),
            self.evicted_spans.load(Ordering::Relaxed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downloader_stats_format() {
        let stats = DownloaderStats::new();

        stats.increment_started();
        stats.increment_started();
        stats.increment_completed();
        stats.increment_failed();
        stats.increment_fallbacks();
        stats.add_chunk_requests(3);
        stats.add_bytes_downloaded(1024 * 1024 * 10);

        let report = stats.format_report(64.0 * 1024.0);

        assert!(report.contains("Sessions: 2"));
        assert!(report.contains("Completed: 1"));
        assert!(report.contains("Failed: 1"));
        assert!(report.contains("Total: 10.0 MB"));
        assert!(report.contains("Throughput: 64.0 KB/s"));
        assert!(report.contains("Requests: 3"));
        assert!(report.contains("Fallbacks: 1"));
    }

    #[test]
    fn test_cache_stats_format() {
        let stats = CacheStats::new();

        stats.record_hit(1024 * 1024);
        stats.record_hit(1024 * 1024);
        stats.record_miss(1024 * 1024);
        stats.add_evictions(4);

        let report = stats.format_report(3 * 1024 * 1024, 7);

        assert!(report.contains("Hit Rate: 66.7%"));
        assert!(report.contains("Spans: 7"));
        assert!(report.contains("Size: 3.0 MB"));
        assert!(report.contains("Evicted: 4"));
    }

    #[test]
    fn test_stats_atomic_operations() {
        let stats = DownloaderStats::new();

        for _ in 0..10 {
            stats.increment_chunks();
        }
        assert_eq!(stats.chunks_fetched.load(Ordering::Relaxed), 10);

        stats.add_bytes_downloaded(100);
        stats.add_bytes_downloaded(200);
        assert_eq!(stats.total_bytes_downloaded.load(Ordering::Relaxed), 300);
    }
}
