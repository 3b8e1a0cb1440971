pub mod chunk_downloader;
pub mod chunk_manager;
pub mod chunk_policy;
pub mod chunk_store;
pub mod config;
pub mod data_source;
pub mod file_cache;
pub mod metadata;
pub mod pacing;
pub mod state_types;
pub mod stats;
pub mod storage;
mod stream_session;


pub use chunk_downloader::ChunkDownloader;
pub use chunk_manager::{ChunkedStreamManager, CleanupOptions, DEFAULT_BASE_CHUNK_SECONDS};
pub use chunk_policy::SessionPolicy;
pub use chunk_store::ChunkStore;
pub use config::{MediaCacheConfig, StreamConfig};
pub use data_source::{
    CacheDataSource, CacheMode, DataSource, DataSourceFactory, DataSpec, HttpDataSource,
};
pub use file_cache::StreamCache;
pub use metadata::CacheSpan;
pub use pacing::PacingChannel;
pub use state_types::ChunkDownloadState;
pub use stats::{CacheStats, DownloaderStats};
pub use storage::SpanStorage;
