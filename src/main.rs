//! audit-paygate
//!
//! Serves website analyses behind a per-request token payment.
//!
//! ```text
//!   client ──POST /analyze──▶ gateway ──no proof──▶ 402 {amount, token, network, merchant}
//!      │                         │
//!      │ POST /invoices          │ proof: confirmed, unused invoice
//!      ▼                         ▼
//!   invoices ◀── settlement monitor ◀── chain observer (RPC)
//!                                │
//!                                ▼
//!                    job store ◀── executor (modules in order)
//!                        ▲
//!   client ──GET /analysis/{id}/progress, /report
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use audit_paygate::config::loader::parse_config;
use audit_paygate::config::watcher::ConfigWatcher;
use audit_paygate::config::load_config;
use audit_paygate::http::HttpServer;
use audit_paygate::lifecycle::{self, Shutdown};
use audit_paygate::observability::{init_tracing, metrics};

/// Environment variable naming the config file.
const CONFIG_ENV_VAR: &str = "PAYGATE_CONFIG";

#[derive(Parser)]
#[command(name = "audit-paygate", version, about = "Payment-gated website analysis server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        // An empty document yields the defaults, validated like any file.
        None => parse_config("")?,
    };

    init_tracing(&config.observability.log_level);
    tracing::info!("audit-paygate v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        config_file = ?args.config,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let collaborators = lifecycle::connect_collaborators(&config).await?;
    let state = lifecycle::build_state(&config, collaborators, &shutdown)?;
    lifecycle::spawn_background(&state, &config, &shutdown);

    // Keep the watcher alive for the life of the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), Some(updates)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        lifecycle::wait_for_signal().await;
        signal_shutdown.trigger();
    });

    let server = HttpServer::new(&config, state.clone());
    server.run(listener, shutdown.subscribe(), config_updates).await?;

    lifecycle::persist(&state);
    tracing::info!("Shutdown complete");
    Ok(())
}
