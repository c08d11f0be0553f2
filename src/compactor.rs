use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::observability::WAL_COMPACTIONS_TOTAL;
use crate::store::WalStore;

/// Compact once at least `threshold` records have been appended since the
/// last compaction. Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends} append(s) since last compaction, threshold {threshold}");
        return false;
    }
    match store.compact().await {
        Ok(events) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compactor: {appends} append(s) folded into {events} event(s)");
            true
        }
        Err(e) => {
            warn!("compactor: compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the log from growing without bound.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}
