use chunkstream::{ChunkDownloadState, ChunkedStreamManager, CleanupOptions};

use crate::common::TestDirs;

// Port 9 (discard) is never listening, so any network attempt would fail the session.
const UNREACHABLE: &str = "http://127.0.0.1:9/track.mp3";

async fn write_permanent_file(manager: &ChunkedStreamManager, content_id: &str, len: usize) {
    let path = manager.store().final_path(content_id);
    tokio::fs::create_dir_all(path.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&path, vec![7u8; len]).await.unwrap();
}

#[tokio::test]
async fn test_permanent_file_short_circuits_session() {
    let dirs = TestDirs::new();
    let manager = ChunkedStreamManager::new(dirs.stream_config()).unwrap();
    write_permanent_file(&manager, "album/track 1", 64_000).await;

    let path = manager
        .start_streaming("album/track 1", UNREACHABLE, 240_000)
        .await
        .unwrap();
    assert_eq!(path, manager.store().final_path("album/track 1"));

    let state = manager.current_state();
    assert!(state.is_complete);
    assert_eq!(state.percent, 100);
    assert_eq!(state.total_bytes, 64_000);
    assert!(state.last_error.is_none());

    // stays complete: no download task was started
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(manager.current_state(), state);
    assert_eq!(manager.stats().cache_file_hits(), 1);

    manager.stop_and_cleanup(CleanupOptions::keep_cache()).await;
    assert_eq!(manager.current_state(), ChunkDownloadState::default());
    assert!(path.exists());
}

#[tokio::test]
async fn test_uncacheable_content_ignores_permanent_file() {
    let dirs = TestDirs::new();
    let manager = ChunkedStreamManager::new(dirs.stream_config()).unwrap();
    write_permanent_file(&manager, "talk", 64_000).await;

    // 45 minutes is past the caching limit, so the file is not consulted
    let path = manager
        .start_streaming("talk", UNREACHABLE, 2_700_000)
        .await
        .unwrap();
    assert_eq!(path, manager.store().temp_path("talk"));

    let mut rx = manager.state();
    let failed = tokio::time::timeout(std::time::Duration::from_secs(20), async {
        loop {
            if rx.borrow_and_update().last_error.is_some() {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    })
    .await
    .unwrap();
    assert!(failed);
    assert!(!manager.current_state().is_complete);
    assert!(manager.current_state().is_long_content);

    manager.stop_and_cleanup(CleanupOptions::default()).await;
    assert!(!manager.store().final_path("talk").exists());
}
