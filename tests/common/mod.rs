//! Shared harness: boots the full server on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use tokio::net::TcpListener;

use audit_paygate::blockchain::StaticObserver;
use audit_paygate::config::{AppConfig, FlowConfig, TrackerConfig};
use audit_paygate::http::{AppState, HttpServer};
use audit_paygate::jobs::SimulatedExecutor;
use audit_paygate::lifecycle::{self, Collaborators, Shutdown};

pub const MERCHANT: &str = "0x00000000000000000000000000000000000000aa";
pub const TOKEN: &str = "0x00000000000000000000000000000000000000bb";
pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestApp {
    pub addr: SocketAddr,
    pub base_url: String,
    pub observer: Arc<StaticObserver>,
    pub state: AppState,
    pub shutdown: Shutdown,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Invoice amount in base units under the test terms.
    pub fn amount_units(&self) -> U256 {
        self.state.invoices.terms().amount_units
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Configuration with fast timings and no chain.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.blockchain.enabled = false;
    config.observability.metrics_enabled = false;
    config.invoices.merchant_address = MERCHANT.to_string();
    config.invoices.token_address = TOKEN.to_string();
    config.invoices.monitor_interval_ms = 25;
    config.jobs.step_delay_ms = 10;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

pub fn fast_flow() -> FlowConfig {
    FlowConfig {
        confirmation_poll_ms: 20,
        confirmation_timeout_secs: 5,
    }
}

pub fn fast_tracker() -> TrackerConfig {
    TrackerConfig {
        poll_interval_ms: 20,
        settle_delay_ms: 10,
        max_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 50,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: AppConfig) -> TestApp {
    let observer = Arc::new(StaticObserver::new());
    let collaborators = Collaborators {
        observer: observer.clone(),
        executor: Arc::new(SimulatedExecutor::new(Duration::from_millis(config.jobs.step_delay_ms))),
        blockchain: None,
    };

    let shutdown = Shutdown::new();
    let state = lifecycle::build_state(&config, collaborators, &shutdown).unwrap();
    lifecycle::spawn_background(&state, &config, &shutdown);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config, state.clone());
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx, None).await;
    });

    TestApp {
        addr,
        base_url: format!("http://{}", addr),
        observer,
        state,
        shutdown,
    }
}

pub fn payer(byte: u8) -> Address {
    Address::repeat_byte(byte)
}
