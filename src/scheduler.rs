//! Background refresh scheduler
//!
//! One long-lived task walks the registry, re-resolves every station whose
//! URL is missing, suspect or older than the staleness threshold, then
//! sleeps for the poll interval. It is the only thing keeping the cache
//! warm, so a failing or panicking station is logged and skipped rather
//! than ending the loop.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::refresh::Refresher;

/// Outcome of one pass over the registry
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Stations in the registry
    pub checked: usize,
    /// Stations that needed a refresh and got a URL
    pub refreshed: usize,
    /// Stations that needed a refresh and did not get one
    pub failed: usize,
}

/// Scheduler progress, shared with the debug endpoint
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    last_pass: RwLock<Option<PassSummary>>,
    passes: RwLock<u64>,
}

impl SchedulerStatus {
    pub fn last_pass(&self) -> Option<PassSummary> {
        self.last_pass.read().clone()
    }

    pub fn passes(&self) -> u64 {
        *self.passes.read()
    }

    fn record(&self, summary: PassSummary) {
        *self.last_pass.write() = Some(summary);
        *self.passes.write() += 1;
    }
}

/// Handle to the running refresh loop
pub struct RefreshScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Spawn the loop; the first pass starts immediately
    pub fn start(
        refresher: Arc<Refresher>,
        poll_interval: Duration,
        status: Arc<SchedulerStatus>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(
                "Refresh scheduler started ({} stations, poll every {:?})",
                refresher.registry().len(),
                poll_interval
            );
            loop {
                let pass = run_pass(&refresher);
                let summary = tokio::select! {
                    _ = token.cancelled() => break,
                    summary = pass => summary,
                };
                debug!(
                    "Refresh pass: {} checked, {} refreshed, {} failed in {}ms",
                    summary.checked, summary.refreshed, summary.failed, summary.duration_ms
                );
                status.record(summary);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            info!("Refresh scheduler stopped");
        });

        Self { cancel, handle }
    }

    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Refresh scheduler task failed: {}", e);
        }
    }
}

/// Refresh every station that needs it, one at a time
pub async fn run_pass(refresher: &Refresher) -> PassSummary {
    let started_at = Utc::now();
    let started = Instant::now();
    let mut summary = PassSummary {
        started_at,
        duration_ms: 0,
        checked: 0,
        refreshed: 0,
        failed: 0,
    };

    let names: Vec<String> = refresher
        .registry()
        .iter()
        .map(|s| s.name.clone())
        .collect();

    for name in names {
        summary.checked += 1;
        if !refresher.needs_refresh(&name, Instant::now()) {
            continue;
        }

        match AssertUnwindSafe(refresher.refresh(&name)).catch_unwind().await {
            Ok(Ok(result)) if result.is_success() => summary.refreshed += 1,
            Ok(Ok(_)) => summary.failed += 1,
            Ok(Err(e)) => {
                error!("Refresh of {} failed: {}", name, e);
                summary.failed += 1;
            }
            Err(_) => {
                error!("Refresh of {} panicked", name);
                summary.failed += 1;
            }
        }
    }

    summary.duration_ms = started.elapsed().as_millis() as u64;
    summary
}
