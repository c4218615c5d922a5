//! Periodic removal of finished invoices, jobs and expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::cache::ResponseCache;
use crate::config::RetentionConfig;
use crate::invoices::InvoiceService;
use crate::jobs::JobStore;
use crate::unix_now;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub invoices: usize,
    pub jobs: usize,
    pub cache_entries: usize,
}

pub struct RetentionSweep {
    invoices: Arc<InvoiceService>,
    jobs: Arc<JobStore>,
    cache: Option<ResponseCache>,
    config: RetentionConfig,
}

impl RetentionSweep {
    pub fn new(
        invoices: Arc<InvoiceService>,
        jobs: Arc<JobStore>,
        cache: Option<ResponseCache>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            invoices,
            jobs,
            cache,
            config,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_millis(self.config.sweep_interval_ms);
        tracing::info!(interval_ms = self.config.sweep_interval_ms, "Starting retention sweep");
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires at once; nothing is old enough yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep(unix_now());
                    if report != SweepReport::default() {
                        tracing::debug!(?report, "Retention sweep");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Retention sweep stopped");
                    return;
                }
            }
        }
    }

    pub fn sweep(&self, now: u64) -> SweepReport {
        SweepReport {
            invoices: self.invoices.prune(now, self.config.invoice_secs),
            jobs: self.jobs.prune(now, self.config.job_secs),
            cache_entries: self.cache.as_ref().map(|c| c.purge_expired()).unwrap_or(0),
        }
    }
}
