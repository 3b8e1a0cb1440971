use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::chunk_downloader::ChunkDownloader;
use super::chunk_policy::{self, SessionPolicy, ThroughputEstimate};
use super::chunk_store::ChunkStore;
use super::config::StreamConfig;
use super::pacing::PacingChannel;
use super::state_types::ChunkDownloadState;
use super::stats::DownloaderStats;
use super::stream_session::StreamSession;
use crate::utils::errors::{StreamError, StreamResult};

/// Chunk duration the adaptive sizing scales from when callers don't pick one
pub const DEFAULT_BASE_CHUNK_SECONDS: u64 = 30;

/// How long a cancelled task gets to unwind before it is aborted
const STOP_GRACE: Duration = Duration::from_secs(2);

/// What `stop_and_cleanup` deletes from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Delete the permanent `cached_<id>` file of the stopped content
    pub remove_final_cache: bool,
    /// Keep the partial session file around
    pub retain_temp: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            remove_final_cache: true,
            retain_temp: false,
        }
    }
}

impl CleanupOptions {
    /// Used when a new session replaces the current one: permanent copies survive.
    pub fn keep_cache() -> Self {
        Self {
            remove_final_cache: false,
            retain_temp: false,
        }
    }
}

struct ActiveSession {
    content_id: String,
    cancel: CancellationToken,
    /// `None` when the session was served from a permanent file
    handle: Option<JoinHandle<()>>,
}

/// Drives one progressive download at a time and publishes its progress.
///
/// The consumer starts a session, reads the session file while it grows,
/// watches [`ChunkDownloadState`] through [`state`](Self::state), and paces
/// the download with [`request_next_chunk`](Self::request_next_chunk).
pub struct ChunkedStreamManager {
    config: StreamConfig,
    downloader: ChunkDownloader,
    store: ChunkStore,
    state_tx: Arc<watch::Sender<ChunkDownloadState>>,
    pacing: std::sync::Mutex<PacingChannel>,
    session: Mutex<Option<ActiveSession>>,
    throughput: ThroughputEstimate,
    bytes_per_second: Arc<AtomicU64>,
    stats: DownloaderStats,
}

impl ChunkedStreamManager {
    pub fn new(config: StreamConfig) -> StreamResult<Self> {
        let downloader = ChunkDownloader::from_config(&config)?;
        Self::with_downloader(config, downloader)
    }

    pub fn with_downloader(config: StreamConfig, downloader: ChunkDownloader) -> StreamResult<Self> {
        config
            .validate()
            .map_err(|e| StreamError::Config(e.to_string()))?;
        let cache_dir = config
            .cache_directory()
            .map_err(|e| StreamError::Config(e.to_string()))?;

        let (state_tx, _) = watch::channel(ChunkDownloadState::default());
        let (pacing, _) = PacingChannel::new();
        let assumed = config.assumed_bytes_per_second;

        Ok(Self {
            config,
            downloader,
            store: ChunkStore::new(cache_dir),
            state_tx: Arc::new(state_tx),
            pacing: std::sync::Mutex::new(pacing),
            session: Mutex::new(None),
            throughput: ThroughputEstimate::new(),
            bytes_per_second: Arc::new(AtomicU64::new(assumed)),
            stats: DownloaderStats::new(),
        })
    }

    /// Start a session with the default base chunk duration.
    pub async fn start_streaming(
        &self,
        content_id: &str,
        remote_url: &str,
        estimated_duration_ms: u64,
    ) -> StreamResult<PathBuf> {
        self.start_streaming_with_base(
            content_id,
            remote_url,
            estimated_duration_ms,
            DEFAULT_BASE_CHUNK_SECONDS,
        )
        .await
    }

    /// Stop whatever is running, then either serve a permanent file or spawn
    /// a download into a fresh session file. The returned path is readable
    /// immediately; it grows as chunks land.
    pub async fn start_streaming_with_base(
        &self,
        content_id: &str,
        remote_url: &str,
        estimated_duration_ms: u64,
        base_chunk_seconds: u64,
    ) -> StreamResult<PathBuf> {
        let url = Url::parse(remote_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StreamError::UnsupportedScheme(url.scheme().to_string()));
        }

        let mut session = self.session.lock().await;
        self.stop_locked(&mut session, CleanupOptions::keep_cache())
            .await;

        let policy = SessionPolicy::new(&self.config, estimated_duration_ms, base_chunk_seconds);
        self.throughput.reset();
        self.bytes_per_second.store(
            chunk_policy::bytes_per_second(
                -1,
                estimated_duration_ms,
                self.config.assumed_bytes_per_second,
            ),
            Ordering::Release,
        );
        self.stats.increment_started();

        if policy.should_cache
            && let Some(len) = self.store.final_file_len(content_id).await
        {
            let bps = chunk_policy::bytes_per_second(
                len as i64,
                estimated_duration_ms,
                self.config.assumed_bytes_per_second,
            );
            self.bytes_per_second.store(bps, Ordering::Release);
            self.state_tx.send_replace(ChunkDownloadState::from_cached_file(
                len,
                bps,
                policy.is_long_content,
            ));
            self.stats.increment_cache_file_hit();
            info!(content_id, bytes = len, "Serving from permanent cache file");

            *session = Some(ActiveSession {
                content_id: content_id.to_string(),
                cancel: CancellationToken::new(),
                handle: None,
            });
            return Ok(self.store.final_path(content_id));
        }

        let path = self.store.create_temp(content_id).await?;
        let initial = ChunkDownloadState::starting(policy.is_long_content);
        self.state_tx.send_replace(initial.clone());

        let (pacing, pacing_rx) = PacingChannel::new();
        *self.pacing.lock().unwrap_or_else(PoisonError::into_inner) = pacing;

        let cancel = CancellationToken::new();
        let task = StreamSession {
            content_id: content_id.to_string(),
            url: remote_url.to_string(),
            path: path.clone(),
            estimated_duration_ms,
            policy,
            config: self.config.clone(),
            downloader: self.downloader.clone(),
            store: self.store.clone(),
            state_tx: self.state_tx.clone(),
            throughput: self.throughput.clone(),
            bytes_per_second: self.bytes_per_second.clone(),
            stats: self.stats.clone(),
            pacing: pacing_rx,
            cancel: cancel.clone(),
            current: initial,
        };

        info!(
            content_id,
            duration_ms = estimated_duration_ms,
            long_content = policy.is_long_content,
            cacheable = policy.should_cache,
            "Starting streaming session"
        );

        *session = Some(ActiveSession {
            content_id: content_id.to_string(),
            cancel,
            handle: Some(tokio::spawn(task.run())),
        });

        Ok(path)
    }

    /// Subscribe to progress updates.
    pub fn state(&self) -> watch::Receiver<ChunkDownloadState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ChunkDownloadState {
        self.state_tx.borrow().clone()
    }

    /// Ask the download loop to fetch more. Signals beyond the single pending
    /// slot are dropped; returns how many were queued.
    pub fn request_next_chunk(&self, count: usize) -> usize {
        self.stats.add_chunk_requests(count as u64);
        self.pacing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .request(count)
    }

    /// Translate a playback position into a byte offset. Positions that are
    /// already buffered need no network; for long content a position past the
    /// buffer triggers a burst of chunk requests.
    ///
    /// Downloads stay sequential, so a far-ahead seek is satisfied by filling
    /// forward rather than by jumping.
    pub fn seek_to_position(&self, target_position_ms: u64) -> u64 {
        let bps = self.bytes_per_second.load(Ordering::Acquire);
        let target = ((target_position_ms as f64 / 1000.0) * bps as f64) as u64;
        let state = self.current_state();

        if target < state.buffered_bytes || state.is_complete {
            debug!(target, buffered = state.buffered_bytes, "Seek inside buffered data");
            return target;
        }

        if state.is_long_content {
            let burst = self
                .suggested_prefetch_count()
                .max(self.config.seek_burst_chunks);
            debug!(target, burst, "Seek past buffered data, requesting burst");
            self.request_next_chunk(burst);
        }

        target
    }

    /// How many chunks a consumer should ask for at the current throughput.
    pub fn suggested_prefetch_count(&self) -> usize {
        chunk_policy::prefetch_count(
            &self.config,
            self.throughput.get(),
            self.current_state().is_long_content,
        )
    }

    /// Request more data when less than the configured margin is buffered
    /// ahead of `playback_position_ms`. Returns the number of chunks asked for.
    pub fn ensure_buffer_ahead(&self, playback_position_ms: u64) -> usize {
        let state = self.current_state();
        if state.is_complete {
            return 0;
        }

        let ahead = state
            .buffered_seconds
            .saturating_sub(playback_position_ms / 1000);
        if ahead >= self.config.buffer_ahead_secs {
            return 0;
        }

        let count = self.suggested_prefetch_count();
        debug!(ahead, count, "Buffer margin low, requesting chunks");
        self.request_next_chunk(count);
        count
    }

    /// Cancel the running session, wait for its task to exit, delete files per
    /// `options`, and reset the published state.
    pub async fn stop_and_cleanup(&self, options: CleanupOptions) {
        let mut session = self.session.lock().await;
        self.stop_locked(&mut session, options).await;
    }

    /// Content id of the current session, if any.
    pub async fn active_content_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.content_id.clone())
    }

    pub fn average_throughput(&self) -> f64 {
        self.throughput.get()
    }

    pub fn stats(&self) -> &DownloaderStats {
        &self.stats
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    async fn stop_locked(&self, slot: &mut Option<ActiveSession>, options: CleanupOptions) {
        if let Some(session) = slot.take() {
            session.cancel.cancel();
            if let Some(mut handle) = session.handle {
                let joined = match tokio::time::timeout(STOP_GRACE, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(content_id = %session.content_id, "Session task slow to stop, aborting");
                        handle.abort();
                        handle.await
                    }
                };
                if let Err(e) = joined
                    && e.is_panic()
                {
                    warn!(content_id = %session.content_id, "Session task panicked: {}", e);
                }
            }

            if !options.retain_temp
                && let Err(e) = self.store.delete_temp(&session.content_id).await
            {
                warn!(content_id = %session.content_id, "Failed to delete session file: {}", e);
            }
            if options.remove_final_cache
                && let Err(e) = self.store.delete_final(&session.content_id).await
            {
                warn!(content_id = %session.content_id, "Failed to delete cache file: {}", e);
            }
            debug!(content_id = %session.content_id, "Session stopped");
        }

        let (pacing, _) = PacingChannel::new();
        *self.pacing.lock().unwrap_or_else(PoisonError::into_inner) = pacing;
        self.state_tx.send_replace(ChunkDownloadState::default());
    }
}

impl Drop for ChunkedStreamManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.session.try_lock()
            && let Some(session) = slot.take()
        {
            session.cancel.cancel();
            if let Some(handle) = session.handle {
                handle.abort();
            }
        }
    }
}
