//! Chunk sizing decisions for a streaming session.
//!
//! Everything here is pure: the session loop feeds in observed throughput and
//! gets back byte budgets, so the arithmetic is testable without a network.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::config::StreamConfig;

/// Policy decisions fixed when a session starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionPolicy {
    pub is_long_content: bool,
    pub should_cache: bool,
    /// Duration of the first chunk, picked from the content length bucket
    pub initial_chunk_seconds: u64,
    pub base_chunk_seconds: u64,
}

impl SessionPolicy {
    pub fn new(config: &StreamConfig, estimated_duration_ms: u64, base_chunk_seconds: u64) -> Self {
        Self {
            is_long_content: estimated_duration_ms > config.long_content_threshold_secs * 1000,
            should_cache: estimated_duration_ms <= config.cache_duration_limit_secs * 1000,
            initial_chunk_seconds: initial_chunk_seconds(estimated_duration_ms),
            base_chunk_seconds,
        }
    }
}

/// Longer content gets longer chunks: fewer round trips where first-byte
/// latency matters less.
pub fn initial_chunk_seconds(estimated_duration_ms: u64) -> u64 {
    let secs = estimated_duration_ms / 1000;
    if secs > 3600 {
        60
    } else if secs > 1800 {
        45
    } else if secs > 600 {
        30
    } else {
        20
    }
}

/// Average byte rate of the content, used to convert between bytes and seconds
pub fn bytes_per_second(total_bytes: i64, estimated_duration_ms: u64, assumed: u64) -> u64 {
    let secs = estimated_duration_ms / 1000;
    if total_bytes > 0 && secs > 0 {
        ((total_bytes as u64) / secs).max(1)
    } else {
        assumed.max(1)
    }
}

pub fn clamp_chunk_bytes(config: &StreamConfig, bytes: f64) -> u64 {
    if !bytes.is_finite() || bytes <= 0.0 {
        return config.min_chunk_bytes;
    }
    (bytes as u64).clamp(config.min_chunk_bytes, config.max_chunk_bytes)
}

pub fn initial_chunk_bytes(config: &StreamConfig, policy: &SessionPolicy, bytes_per_second: u64) -> u64 {
    clamp_chunk_bytes(
        config,
        policy.initial_chunk_seconds as f64 * bytes_per_second as f64,
    )
}

/// Target duration of the next chunk, scaled by how the link compares to the
/// baseline throughput.
pub fn next_chunk_seconds(
    config: &StreamConfig,
    policy: &SessionPolicy,
    avg_throughput_bps: f64,
) -> f64 {
    let (min, max) = if policy.is_long_content {
        (config.long_min_chunk_secs, config.long_max_chunk_secs)
    } else {
        (config.short_min_chunk_secs, config.short_max_chunk_secs)
    };

    let ratio = avg_throughput_bps / config.baseline_throughput_bps;
    let target = policy.base_chunk_seconds as f64 * ratio;
    if target.is_finite() {
        target.clamp(min as f64, max as f64)
    } else {
        min as f64
    }
}

pub fn next_chunk_bytes(
    config: &StreamConfig,
    policy: &SessionPolicy,
    avg_throughput_bps: f64,
    bytes_per_second: u64,
) -> u64 {
    let seconds = next_chunk_seconds(config, policy, avg_throughput_bps);
    clamp_chunk_bytes(config, seconds * bytes_per_second as f64)
}

/// How many chunks a consumer should ask for per buffering check
pub fn prefetch_count(config: &StreamConfig, avg_throughput_bps: f64, is_long_content: bool) -> usize {
    let mut count = avg_throughput_bps / config.baseline_throughput_bps;
    if is_long_content {
        count *= config.long_content_prefetch_multiplier;
    }
    if !count.is_finite() {
        return 1;
    }
    (count.round() as usize).clamp(1, config.max_prefetch_chunks)
}

/// Exponentially weighted throughput average shared between the download
/// task and the manager. Stored as `f64` bits so readers never lock.
#[derive(Debug, Clone, Default)]
pub struct ThroughputEstimate {
    bits: Arc<AtomicU64>,
}

impl ThroughputEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }

    /// Fold a new sample in; the first sample seeds the average
    pub fn record(&self, sample_bps: f64, weight: f64) -> f64 {
        let next = ewma(self.get(), sample_bps, weight);
        self.set(next);
        next
    }
}

pub fn ewma(avg: f64, sample: f64, weight: f64) -> f64 {
    if avg == 0.0 {
        sample
    } else {
        avg * (1.0 - weight) + sample * weight
    }
}
