//! The background download loop behind one streaming session.

use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunk_downloader::{ChunkDownloader, RangeResponse};
use super::chunk_policy::{self, SessionPolicy, ThroughputEstimate};
use super::chunk_store::{ChunkStore, ChunkWriter};
use super::config::StreamConfig;
use super::pacing::PacingReceiver;
use super::state_types::ChunkDownloadState;
use super::stats::DownloaderStats;
use crate::utils::errors::{StreamError, StreamResult};

/// Everything the spawned download task owns.
pub(crate) struct StreamSession {
    pub content_id: String,
    pub url: String,
    pub path: PathBuf,
    pub estimated_duration_ms: u64,
    pub policy: SessionPolicy,
    pub config: StreamConfig,
    pub downloader: ChunkDownloader,
    pub store: ChunkStore,
    pub state_tx: Arc<watch::Sender<ChunkDownloadState>>,
    pub throughput: ThroughputEstimate,
    pub bytes_per_second: Arc<AtomicU64>,
    pub stats: DownloaderStats,
    pub pacing: PacingReceiver,
    pub cancel: CancellationToken,
    /// Last published snapshot
    pub current: ChunkDownloadState,
}

impl StreamSession {
    /// Drive the session to completion, failure, or cancellation.
    ///
    /// Cancellation drops whatever await is in flight; it is reported silently
    /// and never touches the published state.
    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            result = self.download() => result,
        };

        match result {
            Ok(()) => {
                self.stats.increment_completed();
                info!(
                    content_id = %self.content_id,
                    bytes = self.current.buffered_bytes,
                    "Streaming session complete"
                );
            }
            Err(e) if e.is_cancelled() => {
                self.stats.increment_cancelled();
                debug!(content_id = %self.content_id, "Streaming session cancelled");
            }
            Err(e) => {
                self.stats.increment_failed();
                warn!(
                    content_id = %self.content_id,
                    bytes = self.current.buffered_bytes,
                    "Streaming session failed: {}", e
                );
                let failed = self.current.failed(e.to_string());
                self.publish(failed);
            }
        }

        info!("{}", self.stats.format_report(self.throughput.get()));
    }

    async fn download(&mut self) -> StreamResult<()> {
        match self
            .downloader
            .probe_length(&self.url, self.config.head_timeout())
            .await
        {
            Some(len) => {
                info!(content_id = %self.content_id, total_bytes = len, "Probed content length");
                self.set_total(len as i64);
            }
            None => {
                warn!(
                    content_id = %self.content_id,
                    "Length probe failed, assuming {} B/s",
                    self.bytes_per_second()
                );
            }
        }

        let mut writer = self.store.open_writer(&self.path).await?;
        let mut chunk_bytes =
            chunk_policy::initial_chunk_bytes(&self.config, &self.policy, self.bytes_per_second());
        let mut downloaded = 0u64;

        debug!(
            content_id = %self.content_id,
            chunk_seconds = self.policy.initial_chunk_seconds,
            chunk_bytes,
            "Starting chunk loop"
        );

        loop {
            let total = self.current.total_bytes;
            if total > 0 && downloaded >= total as u64 {
                return self.finish(&mut writer).await;
            }

            let start = downloaded;
            let mut end = start + chunk_bytes - 1;
            if total > 0 {
                end = end.min(total as u64 - 1);
            }
            let next = self
                .current
                .with_progress(downloaded, self.bytes_per_second(), start);
            self.publish(next);

            let started = Instant::now();
            let response = match self.downloader.fetch_range(&self.url, start, Some(end)).await {
                Ok(response) => response,
                Err(StreamError::RangeUnsupported { status: 416 })
                    if total <= 0 && downloaded > 0 =>
                {
                    debug!(content_id = %self.content_id, "Range past end of stream, treating as EOF");
                    return self.finish(&mut writer).await;
                }
                Err(e) if e.is_range_unsupported() => {
                    if self.policy.is_long_content {
                        warn!(
                            content_id = %self.content_id,
                            "Range refused for long content, giving up: {}", e
                        );
                        return Err(e);
                    }
                    return self.download_full(&mut writer).await;
                }
                Err(e) => return Err(e),
            };

            if let Some(len) = response.total_length
                && self.current.total_bytes <= 0
            {
                info!(content_id = %self.content_id, total_bytes = len, "Learned length from response");
                self.set_total(len as i64);
            }

            let requested = end - start + 1;
            let received = self
                .write_body(response, &mut writer, start, Some(requested))
                .await?;
            downloaded = start + received;

            let elapsed = started.elapsed().as_secs_f64().max(0.001);
            let avg = self
                .throughput
                .record(received as f64 / elapsed, self.config.ewma_weight);
            chunk_bytes = chunk_policy::next_chunk_bytes(
                &self.config,
                &self.policy,
                avg,
                self.bytes_per_second(),
            );
            self.stats.increment_chunks();

            debug!(
                content_id = %self.content_id,
                start,
                received,
                avg_bps = avg as u64,
                next_chunk_bytes = chunk_bytes,
                "Chunk finished"
            );

            let total = self.current.total_bytes;
            let eof = received < requested;
            if (total > 0 && downloaded >= total as u64) || (total <= 0 && eof) {
                return self.finish(&mut writer).await;
            }
            if received == 0 {
                return Err(StreamError::InvalidResponse(format!(
                    "empty body for range starting at {}",
                    start
                )));
            }

            if !self.pacing.wait().await {
                return Err(StreamError::Cancelled);
            }
        }
    }

    /// Single unranged GET for servers that refuse ranges. Runs to the end
    /// without waiting for pacing signals.
    async fn download_full(&mut self, writer: &mut ChunkWriter) -> StreamResult<()> {
        warn!(
            content_id = %self.content_id,
            "Range refused, falling back to a single full download"
        );
        self.stats.increment_fallbacks();

        let started = Instant::now();
        let response = self.downloader.fetch_full(&self.url).await?;
        if let Some(len) = response.total_length
            && self.current.total_bytes <= 0
        {
            self.set_total(len as i64);
        }

        let written = self.write_body(response, writer, 0, None).await?;
        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        self.throughput
            .record(written as f64 / elapsed, self.config.ewma_weight);

        let total = self.current.total_bytes;
        if total > 0 && written < total as u64 {
            return Err(StreamError::InvalidResponse(format!(
                "full download ended at {} of {} bytes",
                written, total
            )));
        }

        self.finish(writer).await
    }

    /// Copy the body to the session file starting at `offset`, publishing
    /// after every network read. Stops after `limit` bytes when given.
    async fn write_body(
        &mut self,
        response: RangeResponse,
        writer: &mut ChunkWriter,
        offset: u64,
        limit: Option<u64>,
    ) -> StreamResult<u64> {
        let mut stream = response.into_response().bytes_stream();
        let mut written = 0u64;

        while let Some(piece) = stream.next().await {
            let piece = piece?;
            let mut data: &[u8] = &piece;
            if let Some(limit) = limit {
                let remaining = (limit - written) as usize;
                if data.len() > remaining {
                    data = &data[..remaining];
                }
            }
            if data.is_empty() {
                break;
            }

            writer.write_at(offset + written, data).await?;
            written += data.len() as u64;
            self.stats.add_bytes_downloaded(data.len() as u64);

            let next = self
                .current
                .with_progress(offset + written, self.bytes_per_second(), offset);
            self.publish(next);

            if limit.is_some_and(|limit| written >= limit) {
                break;
            }
        }

        Ok(written)
    }

    async fn finish(&mut self, writer: &mut ChunkWriter) -> StreamResult<()> {
        writer.sync().await?;

        if self.policy.should_cache && !self.policy.is_long_content {
            if let Err(e) = self.store.promote_to_final(&self.content_id).await {
                warn!(content_id = %self.content_id, "Could not store permanent copy: {}", e);
            }
        } else {
            debug!(content_id = %self.content_id, "Not keeping a permanent copy");
        }

        let done = self.current.completed();
        self.publish(done);
        Ok(())
    }

    fn set_total(&mut self, total_bytes: i64) {
        let bps = chunk_policy::bytes_per_second(
            total_bytes,
            self.estimated_duration_ms,
            self.config.assumed_bytes_per_second,
        );
        self.bytes_per_second.store(bps, Ordering::Release);
        let next = self.current.with_total(total_bytes);
        self.publish(next);
    }

    fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second.load(Ordering::Acquire)
    }

    fn publish(&mut self, state: ChunkDownloadState) {
        self.current = state.clone();
        self.state_tx.send_replace(state);
    }
}
