//! Startup wiring.
//!
//! Subsystems initialize in dependency order: chain observer and executor,
//! then invoice service and job store, then the gateway. Background tasks
//! start after the state is built; listeners start last.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::blockchain::{BlockchainClient, BlockchainError, ChainObserver, RpcObserver, StaticObserver};
use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::gateway::Gateway;
use crate::http::AppState;
use crate::invoices::{InvoiceError, InvoiceService, PaymentTerms, SettlementMonitor};
use crate::jobs::{JobExecutor, JobRunner, JobStore, SimulatedExecutor};
use crate::lifecycle::{RetentionSweep, Shutdown};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("payment terms: {0}")]
    Terms(#[from] InvoiceError),

    #[error("blockchain: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("invoice persistence: {0}")]
    Persistence(#[from] std::io::Error),
}

/// External capabilities the services depend on.
pub struct Collaborators {
    pub observer: Arc<dyn ChainObserver>,
    pub executor: Arc<dyn JobExecutor>,
    pub blockchain: Option<BlockchainClient>,
}

/// Connect to the chain (if enabled) and build the job executor.
pub async fn connect_collaborators(config: &AppConfig) -> Result<Collaborators, StartupError> {
    let executor: Arc<dyn JobExecutor> =
        Arc::new(SimulatedExecutor::new(Duration::from_millis(config.jobs.step_delay_ms)));

    if !config.blockchain.enabled {
        tracing::warn!("Blockchain disabled: no invoice can be settled");
        return Ok(Collaborators {
            observer: Arc::new(StaticObserver::new()),
            executor,
            blockchain: None,
        });
    }

    let client = BlockchainClient::new(config.blockchain.clone()).await?;
    let observer = RpcObserver::new(client.clone(), config.invoices.scan_block_window);
    Ok(Collaborators {
        observer: Arc::new(observer),
        executor,
        blockchain: Some(client),
    })
}

/// Build the services behind the HTTP API.
pub fn build_state(
    config: &AppConfig,
    collaborators: Collaborators,
    shutdown: &Shutdown,
) -> Result<AppState, StartupError> {
    let cache = config
        .cache
        .enabled
        .then(|| ResponseCache::new(Duration::from_millis(config.cache.ttl_ms)));

    let terms = PaymentTerms::from_config(&config.invoices)?;
    let mut invoices = InvoiceService::new(terms, collaborators.observer);
    if let Some(cache) = &cache {
        invoices = invoices.with_cache(cache.clone());
    }
    if let Some(path) = &config.invoices.persistence_path {
        invoices = invoices.with_persistence(path)?;
    }
    let invoices = Arc::new(invoices);

    let mut jobs = JobStore::new(config.jobs.modules.clone());
    if let Some(cache) = &cache {
        jobs = jobs.with_cache(cache.clone());
    }
    let jobs = Arc::new(jobs);

    let runner = JobRunner::new(collaborators.executor, jobs.clone(), shutdown.sender());
    let gateway = Arc::new(Gateway::new(config.gateway.clone(), invoices.clone(), runner));

    tracing::info!(
        amount = %config.invoices.amount,
        token = %config.invoices.token,
        network = %config.invoices.network,
        payment_required = config.gateway.payment_required,
        modules = config.jobs.modules.len(),
        "Services initialized"
    );

    Ok(AppState {
        invoices,
        jobs,
        gateway,
        cache,
        admin: Arc::new(ArcSwap::from_pointee(config.admin.clone())),
        blockchain: collaborators.blockchain,
        started_at: Instant::now(),
    })
}

/// Start the settlement monitor and the retention sweep.
pub fn spawn_background(state: &AppState, config: &AppConfig, shutdown: &Shutdown) {
    let monitor = SettlementMonitor::new(
        state.invoices.clone(),
        Duration::from_millis(config.invoices.monitor_interval_ms),
    );
    tokio::spawn(monitor.run(shutdown.subscribe()));

    let sweep = RetentionSweep::new(
        state.invoices.clone(),
        state.jobs.clone(),
        state.cache.clone(),
        config.retention.clone(),
    );
    tokio::spawn(sweep.run(shutdown.subscribe()));
}

/// Flush state that outlives the process.
pub fn persist(state: &AppState) {
    if let Err(e) = state.invoices.save_to_file() {
        tracing::error!(error = %e, "Failed to save invoices");
    }
}
