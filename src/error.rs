//! # Errores del Servicio
//! src/error.rs
//!
//! Taxonomía de errores por componente. Los errores de negocio de un job
//! (timeout, driver caído, etc.) NO viven aquí: se registran dentro del job
//! como [`JobError`](crate::jobs::types::JobError). Estos tipos cubren los
//! fallos de las operaciones en sí mismas.

use std::path::PathBuf;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::extraction::ExtractionError;
use crate::jobs::types::JobState;

/// Configuración inválida (flags o variables de entorno)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Errores del Job Store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid transition '{transition}' for job {id} in state {from}")]
    InvalidTransition {
        id: String,
        from: JobState,
        transition: &'static str,
    },
}

/// Errores al crear un job
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Queue is full (max capacity: {0})")]
    QueueFull(usize),

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errores del Result Materializer
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Failed to serialize reviews: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write artifact '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact '{path}' does not match its recorded digest")]
    Corrupted { path: PathBuf },
}

/// Errores al levantar el servidor
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error("Failed to initialize extraction backend: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error de la superficie HTTP
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::ServiceUnavailable { .. } => "service_unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    /// Traduce un error de creación de job, con el `Retry-After` configurado
    /// para cuando la cola está llena.
    pub fn from_submit(error: SubmitError, retry_after_secs: u64) -> Self {
        match error {
            SubmitError::InvalidInput(message) => ApiError::BadRequest(message),
            SubmitError::QueueFull(_) => ApiError::ServiceUnavailable {
                message: error.to_string(),
                retry_after_secs: Some(retry_after_secs),
            },
            SubmitError::ShuttingDown => ApiError::ServiceUnavailable {
                message: error.to_string(),
                retry_after_secs: None,
            },
            SubmitError::Store(store) => store.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => ApiError::NotFound(error.to_string()),
            StoreError::InvalidTransition { .. } => ApiError::Conflict(error.to_string()),
        }
    }
}

impl From<MaterializeError> for ApiError {
    fn from(error: MaterializeError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, status = %status, error = %self, "api_error");
        } else {
            tracing::debug!(code, status = %status, error = %self, "api_error");
        }

        let retry_after = match &self {
            ApiError::ServiceUnavailable {
                retry_after_secs: Some(secs),
                ..
            } => Some(*secs),
            _ => None,
        };

        let message = match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Internal(m) => m,
            ApiError::ServiceUnavailable { message, .. } => message,
        };

        let body = Json(ErrorResponse { code, message });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
