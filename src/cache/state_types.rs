use serde::Serialize;

/// Snapshot of a streaming session's buffering progress.
///
/// Never mutated in place: every update builds a new value and publishes it
/// through the manager's `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkDownloadState {
    /// Bytes written to the local file so far
    pub buffered_bytes: u64,
    /// Advertised remote length, -1 when unknown
    pub total_bytes: i64,
    /// Playable seconds covered by `buffered_bytes`
    pub buffered_seconds: u64,
    pub is_complete: bool,
    /// 0..=100, derived from `buffered_bytes / total_bytes`
    pub percent: u8,
    /// Byte offset of the chunk currently being fetched
    pub current_chunk_start: u64,
    pub is_long_content: bool,
    /// Set when the session ended on a genuine failure (never on cancellation)
    pub last_error: Option<String>,
}

impl Default for ChunkDownloadState {
    fn default() -> Self {
        Self {
            buffered_bytes: 0,
            total_bytes: -1,
            buffered_seconds: 0,
            is_complete: false,
            percent: 0,
            current_chunk_start: 0,
            is_long_content: false,
            last_error: None,
        }
    }
}

impl ChunkDownloadState {
    /// Initial state of a session before any byte has arrived
    pub fn starting(is_long_content: bool) -> Self {
        Self {
            is_long_content,
            ..Self::default()
        }
    }

    /// State for content served straight from a permanent cache file
    pub fn from_cached_file(len: u64, bytes_per_second: u64, is_long_content: bool) -> Self {
        Self {
            buffered_bytes: len,
            total_bytes: len as i64,
            buffered_seconds: seconds_for(len, bytes_per_second),
            is_complete: true,
            percent: 100,
            current_chunk_start: 0,
            is_long_content,
            last_error: None,
        }
    }

    pub fn with_total(&self, total_bytes: i64) -> Self {
        let mut next = self.clone();
        next.total_bytes = total_bytes;
        if let Some(percent) = percent_of(next.buffered_bytes, total_bytes) {
            next.percent = percent;
        }
        next
    }

    /// Next snapshot after more bytes were written. `buffered_bytes` never
    /// goes backwards, even when a fallback download restarts at offset 0.
    pub fn with_progress(
        &self,
        buffered_bytes: u64,
        bytes_per_second: u64,
        current_chunk_start: u64,
    ) -> Self {
        let buffered_bytes = buffered_bytes.max(self.buffered_bytes);
        let percent = percent_of(buffered_bytes, self.total_bytes).unwrap_or(self.percent);

        Self {
            buffered_bytes,
            total_bytes: self.total_bytes,
            buffered_seconds: seconds_for(buffered_bytes, bytes_per_second),
            is_complete: false,
            percent,
            current_chunk_start,
            is_long_content: self.is_long_content,
            last_error: None,
        }
    }

    pub fn completed(&self) -> Self {
        let mut next = self.clone();
        if next.total_bytes <= 0 {
            next.total_bytes = next.buffered_bytes as i64;
        }
        next.is_complete = true;
        next.percent = 100;
        next
    }

    pub fn failed(&self, error: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.is_complete = false;
        next.last_error = Some(error.into());
        next
    }

    pub fn has_total(&self) -> bool {
        self.total_bytes > 0
    }
}

/// `floor(buffered * 100 / total)`, or `None` when the total is unknown
pub fn percent_of(buffered_bytes: u64, total_bytes: i64) -> Option<u8> {
    if total_bytes <= 0 {
        return None;
    }
    let percent = (buffered_bytes as u128 * 100) / total_bytes as u128;
    Some(percent.min(100) as u8)
}

pub fn seconds_for(bytes: u64, bytes_per_second: u64) -> u64 {
    if bytes_per_second == 0 {
        0
    } else {
        bytes / bytes_per_second
    }
}
