use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info};

use chunkstream::{ChunkedStreamManager, CleanupOptions, Config};

/// Simulated playback runs this many times faster than real time
const PLAYBACK_SPEEDUP: u64 = 10;
const TICK: Duration = Duration::from_millis(500);

fn usage() -> ! {
    eprintln!("usage: chunkstream <url> <content-id> <duration-ms>");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunkstream=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(url), Some(content_id), Some(duration)) = (args.next(), args.next(), args.next())
    else {
        usage();
    };
    let duration_ms: u64 = duration
        .parse()
        .with_context(|| format!("Invalid duration {:?}", duration))?;

    let config = Config::load()?;
    let manager = ChunkedStreamManager::new(config.streaming)?;

    let path = manager
        .start_streaming(&content_id, &url, duration_ms)
        .await?;
    info!("Streaming {} into {:?}", content_id, path);

    let mut position_ms = 0u64;
    let mut ticker = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            _ = ticker.tick() => {}
        }

        let state = manager.current_state();
        if let Some(ref e) = state.last_error {
            error!("Session failed: {}", e);
            break;
        }

        // play only what is buffered
        let buffered_ms = state.buffered_seconds * 1000;
        position_ms = (position_ms + TICK.as_millis() as u64 * PLAYBACK_SPEEDUP)
            .min(buffered_ms)
            .min(duration_ms);
        let requested = manager.ensure_buffer_ahead(position_ms);

        info!(
            percent = state.percent,
            buffered_bytes = state.buffered_bytes,
            buffered_secs = state.buffered_seconds,
            position_secs = position_ms / 1000,
            requested,
            "Progress"
        );

        if state.is_complete {
            info!("Download complete: {} bytes", state.buffered_bytes);
            break;
        }
    }

    info!(
        "{}",
        manager.stats().format_report(manager.average_throughput())
    );
    manager
        .stop_and_cleanup(CleanupOptions {
            remove_final_cache: false,
            retain_temp: true,
        })
        .await;

    Ok(())
}
