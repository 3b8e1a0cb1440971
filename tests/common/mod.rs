use chunkstream::cache::{MediaCacheConfig, StreamConfig};
use tempfile::TempDir;

/// Scratch directories for one test, removed on drop
pub struct TestDirs {
    pub root: TempDir,
}

impl TestDirs {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::default().with_cache_directory(self.root.path().join("streams"))
    }

    pub fn cache_config(&self) -> MediaCacheConfig {
        MediaCacheConfig {
            cache_directory: Some(self.root.path().join("media")),
            ..MediaCacheConfig::default()
        }
    }
}

impl Default for TestDirs {
    fn default() -> Self {
        Self::new()
    }
}
