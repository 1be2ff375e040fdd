//! # Sistema de Routing
//! src/router/mod.rs
//!
//! Arma el router axum que mapea paths HTTP a los handlers de jobs.
//!
//! ## Arquitectura
//!
//! ```text
//! Request → CORS → SetRequestId → Trace → track_request → Handler → Response
//! ```
//!
//! CORS acepta cualquier origen.
//!
//! Cada respuesta lleva un header `x-request-id` y queda registrada en el
//! collector de métricas bajo el patrón de ruta (`/job/:id`), no la URL concreta.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, ETAG, RETRY_AFTER};
use axum::http::{HeaderName, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::jobs::handlers::{
    cancel_handler, download_handler, health_handler, metrics_handler, scrape_handler,
    status_handler,
};
use crate::jobs::{JobQueries, JobScheduler};
use crate::metrics::MetricsCollector;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Estado compartido por los handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: JobScheduler,
    pub queries: JobQueries,
    pub metrics: MetricsCollector,

    /// Segundos sugeridos en `Retry-After` cuando la cola está llena
    pub retry_after_secs: u64,
}

pub fn create_router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    let trace_header = request_id_header.clone();

    let trace = TraceLayer::new_for_http().make_span_with(move |request: &axum::http::Request<Body>| {
        let request_id = request
            .headers()
            .get(&trace_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/scrape", post(scrape_handler))
        .route("/job/:id", get(status_handler))
        .route("/job/:id/cancel", post(cancel_handler))
        .route("/download/:id", get(download_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_request))
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid::default(),
        ))
        .layer(cors_layer(request_id_header))
        .with_state(state)
}

fn cors_layer(request_id_header: HeaderName) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CONTENT_DISPOSITION, ETAG, RETRY_AFTER, request_id_header])
}

/// Registra cada request en el collector de métricas
async fn track_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    state
        .metrics
        .record_request(&path, response.status().as_u16(), start.elapsed());
    response
}
