//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the axum router for the public API and, when enabled, admin routes
//! - Wire middleware: request ids, tracing, timeout, body limit, metrics
//! - Rate limit the write endpoints per client IP
//! - Apply hot-reloaded configuration
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    map_response_body::MapResponseBodyLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::blockchain::BlockchainClient;
use crate::cache::ResponseCache;
use crate::config::{AdminConfig, AppConfig};
use crate::gateway::Gateway;
use crate::http::handlers;
use crate::invoices::{InvoiceService, PaymentTerms};
use crate::jobs::JobStore;
use crate::observability::metrics;
use crate::security::{rate_limit_middleware, RateLimiterState};

/// Request id header set on every request and echoed on every response.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub invoices: Arc<InvoiceService>,
    pub jobs: Arc<JobStore>,
    pub gateway: Arc<Gateway>,
    pub cache: Option<ResponseCache>,
    pub admin: Arc<ArcSwap<AdminConfig>>,
    pub blockchain: Option<BlockchainClient>,
    pub started_at: Instant,
}

/// HTTP server for the paygate API.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: &AppConfig, state: AppState) -> Self {
        let router = Self::build_router(config, state.clone());
        Self { router, state }
    }

    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState) -> Router {
        let mut writes = Router::new()
            .route("/analyze", post(handlers::analyze))
            .route("/invoices", post(handlers::create_invoice));
        if config.rate_limit.enabled {
            let limiter = Arc::new(RateLimiterState::new(&config.rate_limit));
            writes = writes.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        let mut router = Router::new()
            .merge(writes)
            .route("/invoices/{id}", get(handlers::get_invoice))
            .route("/invoices/{id}/transaction", post(handlers::report_transaction))
            .route("/analysis/{id}/progress", get(handlers::get_progress))
            .route("/analysis/{id}/report", get(handlers::get_report))
            .route("/health", get(handlers::health))
            .with_state(state.clone());

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state));
        }

        let request_id = HeaderName::from_static(X_REQUEST_ID);
        router
            .layer(middleware::from_fn(track_metrics))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                    .layer(MapResponseBodyLayer::new(Body::new))
                    .layer(RequestBodyLimitLayer::new(config.security.max_body_size)),
            )
    }

    /// Serve on `listener` until `shutdown` fires. Configuration received on
    /// `config_updates` replaces payment terms and admin settings.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
        config_updates: Option<mpsc::UnboundedReceiver<AppConfig>>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(mut updates) = config_updates {
            let state = self.state.clone();
            tokio::spawn(async move {
                while let Some(config) = updates.recv().await {
                    apply_config(&state, &config);
                }
            });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Apply a reloaded configuration to the running services.
pub fn apply_config(state: &AppState, config: &AppConfig) {
    match PaymentTerms::from_config(&config.invoices) {
        Ok(terms) => state.invoices.update_terms(terms),
        Err(e) => tracing::error!(error = %e, "Ignoring reloaded payment terms"),
    }
    state.admin.store(Arc::new(config.admin.clone()));
}

async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_request(&method, &route, response.status().as_u16(), start);
    response
}
