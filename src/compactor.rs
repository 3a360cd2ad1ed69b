use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::rack::Rack;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the rack's WAL if enough appends piled up since the last pass.
/// Returns whether a compaction ran.
pub async fn compact_if_due(rack: &Rack, threshold: u64) -> bool {
    let appends = rack.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match rack.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task: periodically compact the WAL of one property.
pub async fn run_compactor(rack: Arc<Rack>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&rack, threshold).await;
    }
}
