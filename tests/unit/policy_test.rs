use chunkstream::cache::StreamConfig;
use chunkstream::cache::chunk_policy::{self, SessionPolicy};

#[test]
fn test_forty_minute_content_is_long_and_uncached() {
    let config = StreamConfig::default();
    let policy = SessionPolicy::new(&config, 2_400_000, 30);

    assert!(policy.is_long_content);
    assert!(!policy.should_cache);
    assert_eq!(policy.initial_chunk_seconds, 45);
}

#[test]
fn test_chunk_bytes_stay_clamped_for_any_throughput() {
    let config = StreamConfig::default();
    for duration_ms in [60_000, 900_000, 1_500_000, 2_400_000, 7_200_000] {
        let policy = SessionPolicy::new(&config, duration_ms, 30);
        for avg in [0.0, 1.0, 5_000.0, 64_000.0, 1e6, 1e9, f64::INFINITY] {
            for bps in [1, 16_000, 2_000_000] {
                let bytes = chunk_policy::next_chunk_bytes(&config, &policy, avg, bps);
                assert!(
                    (32_000..=20_000_000).contains(&bytes),
                    "{} bytes for avg {} bps {}",
                    bytes,
                    avg,
                    bps
                );
            }
        }
    }
}

#[test]
fn test_prefetch_count_bounds() {
    let config = StreamConfig::default();
    assert_eq!(chunk_policy::prefetch_count(&config, 0.0, false), 1);
    assert_eq!(chunk_policy::prefetch_count(&config, 128_000.0, false), 2);
    assert_eq!(chunk_policy::prefetch_count(&config, 128_000.0, true), 3);
    assert_eq!(chunk_policy::prefetch_count(&config, 1e9, true), 8);
}
