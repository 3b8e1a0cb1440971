pub mod cache_service;

pub use cache_service::{StreamCacheService, stream_cache_service};
