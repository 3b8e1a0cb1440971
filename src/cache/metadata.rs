use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Index format written to `index.json`
pub const INDEX_VERSION: u32 = 1;

/// One contiguous byte range of a key, stored in its own file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpan {
    pub key: String,
    /// Offset of the first byte within the resource
    pub position: u64,
    pub length: u64,
    /// File name relative to the cache directory
    pub file_name: String,
    pub last_accessed: DateTime<Utc>,
}

impl CacheSpan {
    pub fn new(key: impl Into<String>, position: u64, length: u64, file_id: u64) -> Self {
        Self {
            key: key.into(),
            position,
            length,
            file_name: format!("span_{:08}.bin", file_id),
            last_accessed: Utc::now(),
        }
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.position + self.length
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.position && offset < self.end()
    }

    pub fn overlaps(&self, position: u64, length: u64) -> bool {
        position < self.end() && self.position < position + length
    }

    pub fn mark_accessed(&mut self) {
        self.last_accessed = Utc::now();
    }
}

/// Persisted snapshot of every span, in least- to most-recently-used order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanIndex {
    pub version: u32,
    pub next_file_id: u64,
    pub spans: Vec<CacheSpan>,
    pub last_updated: DateTime<Utc>,
}

impl Default for SpanIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            next_file_id: 0,
            spans: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl SpanIndex {
    pub fn total_size(&self) -> u64 {
        self.spans.iter().map(|s| s.length).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_bounds() {
        let span = CacheSpan::new("track", 100, 50, 7);
        assert_eq!(span.end(), 150);
        assert_eq!(span.file_name, "span_00000007.bin");

        assert!(!span.contains(99));
        assert!(span.contains(100));
        assert!(span.contains(149));
        assert!(!span.contains(150));
    }

    #[test]
    fn test_span_overlap() {
        let span = CacheSpan::new("track", 100, 50, 0);
        assert!(span.overlaps(0, 101));
        assert!(span.overlaps(149, 10));
        assert!(span.overlaps(120, 5));
        assert!(!span.overlaps(0, 100));
        assert!(!span.overlaps(150, 10));
    }

    #[test]
    fn test_index_serialization() {
        let mut index = SpanIndex::default();
        index.spans.push(CacheSpan::new("a", 0, 10, 0));
        index.spans.push(CacheSpan::new("b", 0, 5, 1));
        index.next_file_id = 2;

        let json = serde_json::to_string(&index).unwrap();
        let parsed: SpanIndex = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.version, INDEX_VERSION);
        assert_eq!(parsed.spans, index.spans);
        assert_eq!(parsed.total_size(), 15);
    }
}
