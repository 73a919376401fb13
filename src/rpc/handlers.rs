//! HTTP handlers and router for the RPC surface
//!
//! Each operation is `POST /rpc/<Method>` with a JSON body and always answers
//! HTTP 200 with a [`Reply`]; a body that does not parse is a `status = 0`
//! reply, not a 4xx.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use super::service::HistoryService;
use super::types::{
    AggregateRequest, AttributesHistoryRequest, DeviceHistoryRequest, HealthResponse,
    PagedHistoryRequest, Reply, SeriesRequest,
};
use crate::ingestion::IngestionMetrics;
use crate::metrics::RpcMetrics;

// =============================================================================
// Application State
// =============================================================================

/// Shared state of the HTTP server
pub struct AppState {
    /// History operations
    pub service: HistoryService,
    /// RPC metrics
    pub metrics: RpcMetrics,
    /// Ingestion counters, appended to `/metrics` when the pipeline runs
    pub ingestion: Option<Arc<IngestionMetrics>>,
}

impl AppState {
    /// State without an ingestion pipeline
    pub fn new(service: HistoryService, metrics: RpcMetrics) -> Self {
        Self {
            service,
            metrics,
            ingestion: None,
        }
    }

    /// Attach ingestion counters
    pub fn with_ingestion(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.ingestion = Some(metrics);
        self
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build a CORS layer, any origin when the list is empty
pub fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if cors_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // History operations
        .route(
            "/rpc/GetDeviceAttributesHistory",
            post(get_device_attributes_history),
        )
        .route("/rpc/GetDeviceHistory", post(get_device_history))
        .route(
            "/rpc/GetDeviceHistoryWithPageAndPage",
            post(get_device_history_with_page),
        )
        .route(
            "/rpc/GetDeviceKVDataWithNoAggregate",
            post(get_kv_data_without_aggregate),
        )
        .route(
            "/rpc/GetDeviceKVDataWithAggregate",
            post(get_kv_data_with_aggregate),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
}

// =============================================================================
// Health & Metrics Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus exposition: RPC registry followed by ingestion counters
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.gather() {
        Ok(mut body) => {
            if let Some(ingestion) = &state.ingestion {
                body.push_str(&ingestion.render_prometheus());
            }
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                body,
            )
        },
        Err(e) => {
            error!(error = %e, "Failed to gather metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                e,
            )
        },
    }
}

// =============================================================================
// History Handlers
// =============================================================================

/// Decode the body, run the call, record metrics
async fn dispatch<T, F, Fut>(
    state: &AppState,
    method: &'static str,
    body: &[u8],
    call: F,
) -> Json<Reply>
where
    T: DeserializeOwned,
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Reply>,
{
    let started = Instant::now();
    let reply = match serde_json::from_slice::<T>(body) {
        Ok(request) => call(request).await,
        Err(e) => {
            debug!(method, error = %e, "Malformed RPC body");
            Reply::error(format!("Malformed request: {}", e))
        },
    };
    state
        .metrics
        .record_request(method, reply.is_success(), started.elapsed().as_secs_f64());
    Json(reply)
}

/// `POST /rpc/GetDeviceAttributesHistory`
pub async fn get_device_attributes_history(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<Reply> {
    let service = state.service.clone();
    dispatch(
        &state,
        "GetDeviceAttributesHistory",
        &body,
        |req: AttributesHistoryRequest| async move {
            service.get_device_attributes_history(&req).await
        },
    )
    .await
}

/// `POST /rpc/GetDeviceHistory`
pub async fn get_device_history(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Reply> {
    let service = state.service.clone();
    dispatch(
        &state,
        "GetDeviceHistory",
        &body,
        |req: DeviceHistoryRequest| async move { service.get_device_history(&req).await },
    )
    .await
}

/// `POST /rpc/GetDeviceHistoryWithPageAndPage`
pub async fn get_device_history_with_page(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<Reply> {
    let service = state.service.clone();
    dispatch(
        &state,
        "GetDeviceHistoryWithPageAndPage",
        &body,
        |req: PagedHistoryRequest| async move { service.get_device_history_with_page(&req).await },
    )
    .await
}

/// `POST /rpc/GetDeviceKVDataWithNoAggregate`
pub async fn get_kv_data_without_aggregate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<Reply> {
    let service = state.service.clone();
    dispatch(
        &state,
        "GetDeviceKVDataWithNoAggregate",
        &body,
        |req: SeriesRequest| async move { service.get_kv_data_without_aggregate(&req).await },
    )
    .await
}

/// `POST /rpc/GetDeviceKVDataWithAggregate`
pub async fn get_kv_data_with_aggregate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<Reply> {
    let service = state.service.clone();
    dispatch(
        &state,
        "GetDeviceKVDataWithAggregate",
        &body,
        |req: AggregateRequest| async move { service.get_kv_data_with_aggregate(&req).await },
    )
    .await
}
