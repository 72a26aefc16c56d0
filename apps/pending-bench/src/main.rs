//! Add/Commit throughput driver.
//!
//! Usage: `pending-bench [PATH] [COUNT]`
//!
//! Adds COUNT operations, commits all of them, closes the log and reports the
//! elapsed time.

use bytes::Bytes;
use nori_pending::PendingLog;
use std::time::{Instant, SystemTime};

const DEFAULT_COUNT: i64 = 1_000_000;
const PAYLOAD_LEN: usize = 512;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "tx.log".to_string());
    let count = match args.next() {
        Some(raw) => raw.parse::<i64>()?,
        None => DEFAULT_COUNT,
    };

    let mut payload = vec![b'x'; PAYLOAD_LEN];
    payload.extend_from_slice(b"This is a test");
    let payload = Bytes::from(payload);

    tracing::info!("Writing {} add/commit pairs to {}", count, path);
    let start = Instant::now();

    let log = PendingLog::open(&path).await?;
    for id in 0..count {
        log.add(id, SystemTime::now(), 1, payload.clone()).await?;
    }
    for id in 0..count {
        log.commit(id, SystemTime::now()).await?;
    }
    let stats = log.stats().await?;
    log.close().await?;

    let elapsed = start.elapsed().as_secs_f64();
    tracing::info!("Elapsed seconds : {:.3}", elapsed);
    tracing::info!("Ops /sec        : {:.3}", count as f64 / elapsed);
    tracing::info!(
        "Syncs           : {} by count, {} by pulse",
        stats.syncs_by_count,
        stats.syncs_by_pulse
    );

    Ok(())
}
