//! # Handlers HTTP para Jobs
//! src/jobs/handlers.rs
//!
//! Implementa los endpoints del servicio:
//! - `GET  /health`
//! - `POST /scrape`
//! - `GET  /job/{id}`
//! - `POST /job/{id}/cancel`
//! - `GET  /download/{id}`
//! - `GET  /metrics`

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::query::ArtifactLookup;
use super::types::{Job, JobState};
use crate::error::ApiError;
use crate::extraction::ExtractionOptions;
use crate::router::AppState;

/// Body de `POST /scrape`
///
/// # Ejemplo
/// ```json
/// {"location_reference": "https://www.google.com/maps/place/...", "async_mode": true}
/// ```
#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    #[serde(alias = "maps_url")]
    pub location_reference: String,

    #[serde(default = "default_async_mode")]
    pub async_mode: bool,

    #[serde(default)]
    pub options: ExtractionOptions,
}

fn default_async_mode() -> bool {
    true
}

/// Respuesta de `POST /scrape` en modo asíncrono
#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeAccepted {
    pub job_id: String,
    pub state: JobState,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub adapter_reachable: bool,
    pub adapter: String,
    pub timestamp: String,
}

/// Handler para `GET /health`
///
/// Siempre responde 200; `status` es `degraded` si el backend de navegador
/// no responde.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.queries.health().await;

    Json(HealthResponse {
        status: if report.adapter_reachable { "ok" } else { "degraded" },
        adapter_reachable: report.adapter_reachable,
        adapter: report.adapter,
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Handler para `POST /scrape`
///
/// - `async_mode = true`: 202 con `{job_id, state}`
/// - `async_mode = false`: espera el estado terminal y responde 200 con el job
/// - body mal formado o sin `location_reference`: 400
pub async fn scrape_handler(
    State(state): State<AppState>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let retry_after = state.retry_after_secs;

    if request.async_mode {
        let job = state
            .scheduler
            .submit(&request.location_reference, request.options)
            .map_err(|e| ApiError::from_submit(e, retry_after))?;

        let body = ScrapeAccepted {
            job_id: job.id,
            state: job.state,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let job = state
        .scheduler
        .submit_and_wait(&request.location_reference, request.options)
        .await
        .map_err(|e| ApiError::from_submit(e, retry_after))?;

    Ok(Json(job).into_response())
}

/// Handler para `GET /job/{id}`
pub async fn status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .queries
        .status(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// Handler para `POST /job/{id}/cancel`
pub async fn cancel_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.scheduler.cancel(&job_id)?;
    Ok(Json(job))
}

/// Handler para `GET /download/{id}`
///
/// Devuelve el arreglo JSON de reseñas de un job SUCCEEDED.
pub async fn download_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.queries.artifact(&job_id).await? {
        ArtifactLookup::Ready { bytes, artifact } => {
            let mut response = (StatusCode::OK, bytes).into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            if let Ok(value) =
                HeaderValue::from_str(&format!("attachment; filename=\"{}\"", artifact.file_name))
            {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", artifact.sha256)) {
                headers.insert(header::ETAG, value);
            }
            Ok(response)
        }
        ArtifactLookup::NotReady(job_state) => Err(ApiError::Conflict(format!(
            "Job {} has no result (state: {})",
            job_id, job_state
        ))),
        ArtifactLookup::NotFound => Err(ApiError::NotFound(format!("Job not found: {}", job_id))),
    }
}

/// Handler para `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Json<Value> {
    let mut metrics = state.metrics.get_metrics_json();
    if let Value::Object(map) = &mut metrics {
        map.insert("queue".to_string(), json!(state.scheduler.stats()));
    }
    Json(metrics)
}
