//! Adaptive chunked streaming downloads with a byte-range media cache.
//!
//! [`ChunkedStreamManager`] pulls a remote resource into a local file in
//! throughput-sized chunks, paced by the consumer. [`StreamCache`] keeps
//! recently read byte ranges on disk under a fixed budget.

pub mod cache;
pub mod config;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use cache::{
    CacheMode, ChunkDownloadState, ChunkedStreamManager, CleanupOptions, DataSource,
    DataSourceFactory, DataSpec, StreamCache,
};
pub use config::Config;
pub use services::{StreamCacheService, stream_cache_service};
pub use utils::{StreamError, StreamResult};
