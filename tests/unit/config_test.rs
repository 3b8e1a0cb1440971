use chunkstream::Config;

use crate::common::TestDirs;

#[test]
fn test_defaults_carry_documented_constants() {
    let config = Config::default();

    assert_eq!(config.streaming.long_content_threshold_secs, 20 * 60);
    assert_eq!(config.streaming.cache_duration_limit_secs, 30 * 60);
    assert_eq!(config.streaming.buffer_ahead_secs, 60);
    assert_eq!(config.streaming.ewma_weight, 0.25);
    assert_eq!(config.streaming.baseline_throughput_bps, 64_000.0);
    assert_eq!(config.streaming.max_prefetch_chunks, 8);
    assert_eq!(config.cache.max_size_bytes(), 200 * 1024 * 1024);
    assert!(config.validate().is_ok());
}

#[test]
fn test_round_trip_through_file() {
    let dirs = TestDirs::new();
    let path = dirs.root.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.streaming = dirs.stream_config();
    config.streaming.seek_burst_chunks = 6;
    config.cache.max_size_mb = 32;
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.streaming.seek_burst_chunks, 6);
    assert_eq!(loaded.cache.max_size_mb, 32);
    assert_eq!(
        loaded.streaming.cache_directory().unwrap(),
        dirs.root.path().join("streams")
    );
}

#[test]
fn test_invalid_file_is_rejected() {
    let dirs = TestDirs::new();
    let path = dirs.root.path().join("config.toml");
    std::fs::write(&path, "[streaming]\newma_weight = 0.0\n").unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("ewma_weight"));
}
