use chunkstream::{CacheMode, DataSource, DataSpec, stream_cache_service};
use std::sync::Arc;

use crate::common::TestDirs;

// The only test touching the process-wide service, so nothing races it.
#[tokio::test]
async fn test_global_service_lifecycle() {
    let dirs = TestDirs::new();
    let config = dirs.cache_config();
    let service = stream_cache_service();

    service.release().await.unwrap();
    assert!(!service.is_initialized().await);

    let cache = service.get_handle_with(&config).await.unwrap();
    assert!(service.is_initialized().await);
    assert!(Arc::ptr_eq(
        &cache,
        &service.get_handle_with(&config).await.unwrap()
    ));

    // an unreachable origin with a zero-length request never needs the network
    let factory = cache.data_source_factory(CacheMode::Normal);
    let mut source = factory.create();
    let spec = DataSpec::new("http://127.0.0.1:9/none", "empty").with_range(0, Some(0));
    assert_eq!(source.open(spec).await.unwrap(), Some(0));
    assert!(source.read(1024).await.unwrap().is_none());
    source.close().await;

    assert!(!cache.is_cached("anything").await);
    assert_eq!(cache.cached_bytes("anything").await, 0);

    service.release().await.unwrap();
    assert!(!service.is_initialized().await);

    let rebuilt = service.get_handle_with(&config).await.unwrap();
    assert!(!Arc::ptr_eq(&cache, &rebuilt));
    assert!(cache.is_closed().await);
    assert!(cache.clear_cache().await.is_err());
    rebuilt.clear_cache().await.unwrap();
    service.release().await.unwrap();
}
