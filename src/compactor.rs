use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::backend::MemoryBackend;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the backend journal once it has grown by
/// `threshold` appends.
pub async fn run_compactor(backend: Arc<MemoryBackend>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&backend, threshold).await {
            tracing::error!("journal compaction failed: {e}");
        }
    }
}

/// Compact now if the journal has reached `threshold`. Returns whether it ran.
pub async fn compact_if_due(
    backend: &MemoryBackend,
    threshold: u64,
) -> Result<bool, crate::ports::BackendError> {
    let appends = backend.journal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return Ok(false);
    }
    backend.compact_wal().await?;
    info!(appends, "compacted journal");
    Ok(true)
}
