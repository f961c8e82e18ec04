// Retention GC: drops profile rows older than the configured window.
// Target registry rows are never touched.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ProfileStorage;
use crate::config;
use crate::util;

const GC_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn(store: Arc<ProfileStorage>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(GC_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval() fires immediately; GC waits a full period first.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => run_gc(&store).await,
            }
        }
    })
}

/// One GC pass over every known target. Per-target failures are logged and
/// do not stop the pass.
pub async fn run_gc(store: &ProfileStorage) {
    let start = std::time::Instant::now();
    let retention_secs = config::global_config()
        .continuous_profiling
        .data_retention_seconds;
    let safepoint = util::now_millis() - (retention_secs as i64) * 1000;

    let targets = store.known_targets().await;
    let total = targets.len();
    let mut deleted: u64 = 0;
    for (target, info) in targets {
        match store.delete_profiles_before(info.id, safepoint).await {
            Ok(n) => deleted += n,
            Err(e) => warn!(
                kind = %target.kind,
                component = %target.component,
                address = %target.address,
                error = %e,
                "gc delete target data failed"
            ),
        }
    }
    info!(
        total_targets = total,
        deleted,
        safepoint,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "gc finished"
    );
}
