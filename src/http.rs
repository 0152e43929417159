//! HTTP transport module for explore-llm
//!
//! Axum router exposing `/decompose`, `/options` and `/summary`, plus plain JSON
//! health, info and metrics endpoints. Every operation runs under a child of the
//! server's shutdown token and a whole-request deadline.

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use std::{cmp::Ordering, collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::Instrument;

use crate::config::Config;
use crate::error::{ExploreError, Result};
use crate::operations::{DecomposeRequest, Operation, Operations, OptionsRequest, SummaryRequest};

const LATENCY_WINDOW: usize = 256;
const OPERATION_PATHS: [&str; 3] = ["/decompose", "/options", "/summary"];

/// Shared state for HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub operations: Arc<Operations>,
    pub metrics: Arc<Mutex<HttpMetrics>>,
    /// Cancelled on shutdown; each request runs under a child token
    pub shutdown: CancellationToken,
}

impl HttpState {
    pub fn new(config: Arc<Config>, operations: Arc<Operations>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            operations,
            metrics: Arc::new(Mutex::new(HttpMetrics::new())),
            shutdown,
        }
    }
}

/// Metrics for HTTP server
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    pub total_requests: u64,
    pub last_request_unix: u64,
    pub errors_total: u64,
    pub latencies: Vec<f64>, // ring buffer for p95
    pub operations_count: HashMap<String, u64>,
}

impl HttpMetrics {
    fn new() -> Self {
        Self {
            total_requests: 0,
            last_request_unix: unix_now(),
            errors_total: 0,
            latencies: Vec::with_capacity(LATENCY_WINDOW),
            operations_count: HashMap::new(),
        }
    }

    fn record(&mut self, path: &str, latency_ms: f64, success: bool) {
        self.latencies.push(latency_ms);
        if self.latencies.len() > LATENCY_WINDOW {
            self.latencies.remove(0);
        }
        if !success {
            self.errors_total = self.errors_total.saturating_add(1);
        }
        *self
            .operations_count
            .entry(path.trim_start_matches('/').to_string())
            .or_insert(0) += 1;
        self.total_requests = self.total_requests.saturating_add(1);
        self.last_request_unix = unix_now();
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Root liveness endpoint
pub async fn root_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Info endpoint
pub async fn info_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let completion = &state.config.completion;
    let prompts: Vec<_> = state
        .operations
        .prompts()
        .list()
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "operation": p.kind,
                "version": p.version,
                "checksum": p.checksum,
            })
        })
        .collect();

    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "completion": {
            "model": state.operations.model(),
            "base_url": completion.base_url,
            "structured_output": state.operations.structured(),
            "timeout_ms": completion.timeout_ms,
            "max_retries": completion.max_retries,
        },
        "prompts": prompts,
        "server": {
            "bind": state.config.server.bind.to_string(),
            "cors_origins": state.config.server.cors_origins,
            "request_timeout_ms": state.config.server.request_timeout_ms,
        }
    }))
}

/// Metrics endpoint
pub async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let metrics = state.metrics.lock().await.clone();

    // Compute latency stats
    let (avg_latency_ms, p95_latency_ms) = if metrics.latencies.is_empty() {
        (None, None)
    } else {
        let sum: f64 = metrics.latencies.iter().sum();
        let avg = sum / metrics.latencies.len() as f64;
        let mut sorted = metrics.latencies.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let p95_idx = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
        (Some(avg), sorted.get(p95_idx).copied())
    };

    Json(json!({
        "metrics_version": "1",
        "total_requests": metrics.total_requests,
        "last_request_unix": metrics.last_request_unix,
        "errors_total": metrics.errors_total,
        "avg_latency_ms": avg_latency_ms,
        "p95_latency_ms": p95_latency_ms,
        "operations": metrics.operations_count,
    }))
}

/// Shared handler for the three operations
async fn operation_handler<O>(
    State(state): State<HttpState>,
    payload: std::result::Result<Json<O>, JsonRejection>,
) -> Result<Json<O::Output>>
where
    O: Operation + DeserializeOwned + Send + Sync + 'static,
    O::Output: Serialize + Send + 'static,
{
    let Json(request) = payload.map_err(|rejection| ExploreError::validation(rejection.body_text()))?;
    run_with_deadline(&state, &request).await.map(Json)
}

async fn run_with_deadline<O: Operation>(state: &HttpState, request: &O) -> Result<O::Output> {
    let cancel = state.shutdown.child_token();
    // Cancels the upstream call if this future is dropped (client went away)
    let _guard = cancel.clone().drop_guard();
    let timeout_ms = state.config.server.request_timeout_ms;

    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        state.operations.run(request, &cancel),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ExploreError::Timeout {
            operation: O::KIND.as_str().to_string(),
            timeout_ms,
        }),
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

/// Build the application router
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/metrics", get(metrics_handler))
        .route("/decompose", post(operation_handler::<DecomposeRequest>))
        .route("/options", post(operation_handler::<OptionsRequest>))
        .route("/summary", post(operation_handler::<SummaryRequest>))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            |State(metrics): State<Arc<Mutex<HttpMetrics>>>,
             req: axum::http::Request<Body>,
             next: axum::middleware::Next| async move {
                let path = req.uri().path().to_string();
                let is_operation = OPERATION_PATHS.contains(&path.as_str());
                let start = std::time::Instant::now();
                let resp = next.run(req).await;
                if is_operation {
                    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                    metrics
                        .lock()
                        .await
                        .record(&path, latency_ms, resp.status().is_success());
                }
                resp
            },
        ))
        // Request id span around everything below
        .layer(middleware::from_fn(
            |req: axum::http::Request<Body>, next: axum::middleware::Next| async move {
                let request_id = uuid::Uuid::new_v4().to_string();
                let span = tracing::info_span!(
                    "request",
                    id = %request_id,
                    method = %req.method(),
                    path = %req.uri().path()
                );
                let mut resp = next.run(req).instrument(span).await;
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    resp.headers_mut().insert("x-request-id", value);
                }
                resp
            },
        ))
        .layer(cors_layer(&state.config.server.cors_origins))
        .with_state(state)
}

/// Start the HTTP server and serve until Ctrl-C / SIGTERM
pub async fn start_http_server(config: Arc<Config>, operations: Arc<Operations>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let state = HttpState::new(config.clone(), operations, shutdown.clone());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .map_err(|e| {
            ExploreError::config(format!("Failed to bind HTTP listener on {}: {e}", config.server.bind))
        })?;

    tracing::info!(
        "Starting HTTP server on {} (model {}, structured output {}, CORS {:?})",
        config.server.bind,
        config.completion.model,
        config.completion.structured_output,
        config.server.cors_origins
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, cancelling in-flight requests");
    token.cancel();
}
