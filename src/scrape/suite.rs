// One scrape suite: a cancellable periodic loop pulling a single
// (member, profile kind) and writing successful bodies to the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::target::Scraper;
use crate::profile_repo::ProfileStorage;
use crate::util;

/// Handle kept by the manager while the suite task runs: stop signal plus
/// the last successful scrape time and size.
#[derive(Clone)]
pub struct SuiteHandle {
    cancel: CancellationToken,
    last_scrape_ms: Arc<AtomicI64>,
    last_scrape_size: Arc<AtomicUsize>,
}

impl SuiteHandle {
    pub(super) fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            last_scrape_ms: Arc::new(AtomicI64::new(0)),
            last_scrape_size: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Millisecond timestamp of the last successfully stored scrape, 0 if
    /// none yet.
    pub fn last_scrape_millis(&self) -> i64 {
        self.last_scrape_ms.load(Ordering::Relaxed)
    }

    pub fn last_scrape_size(&self) -> usize {
        self.last_scrape_size.load(Ordering::Relaxed)
    }

    pub(super) fn stop(&self) {
        self.cancel.cancel();
    }
}

pub(super) async fn run(
    scraper: Scraper,
    store: Arc<ProfileStorage>,
    interval: Duration,
    timeout: Duration,
    handle: SuiteHandle,
) {
    let target = scraper.target().clone();
    info!(
        kind = %target.kind,
        component = %target.component,
        address = %target.address,
        "scrape suite started"
    );

    // Offset the first pull so suites started together do not stampede the
    // cluster in lockstep.
    let delay = util::jitter_delay(util::now_nanos(), interval);
    tokio::select! {
        _ = handle.cancel.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut last_scrape_size = 0usize;

    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => {
                info!(
                    kind = %target.kind,
                    component = %target.component,
                    address = %target.address,
                    "scrape suite stopped"
                );
                return;
            }
            _ = tick.tick() => {}
        }

        // Bound steady-state memory: drop an oversized buffer left over
        // from an unusually large body.
        if last_scrape_size > 0 && buf.capacity() > 2 * last_scrape_size {
            buf = Vec::with_capacity(last_scrape_size);
        }
        buf.clear();

        let start = std::time::SystemTime::now();
        let scraped = tokio::select! {
            _ = handle.cancel.cancelled() => return,
            result = scraper.scrape(timeout, &mut buf) => result,
        };

        match scraped {
            Ok(()) if !buf.is_empty() => {
                last_scrape_size = buf.len();
                let ts = util::unix_millis(start);
                match store.add_profile(&target, ts, &buf).await {
                    Ok(()) => {
                        handle.last_scrape_ms.store(ts, Ordering::Relaxed);
                        handle.last_scrape_size.store(buf.len(), Ordering::Relaxed);
                        debug!(
                            kind = %target.kind,
                            component = %target.component,
                            address = %target.address,
                            ts,
                            bytes = buf.len(),
                            "scrape success"
                        );
                    }
                    Err(e) => warn!(
                        kind = %target.kind,
                        component = %target.component,
                        address = %target.address,
                        error = %e,
                        "store scraped profile failed"
                    ),
                }
            }
            Ok(()) => {}
            // No retry inside a tick; the next tick is the next attempt.
            Err(e) => warn!(
                kind = %target.kind,
                component = %target.component,
                address = %target.address,
                error = %e,
                "scrape failed"
            ),
        }
    }
}
