//! # Tipos y Estructuras para el Sistema de Jobs
//! src/jobs/types.rs
//!
//! Define el registro de un job de extracción y su máquina de estados.
//!
//! ```text
//!  PENDING --Dispatch--> RUNNING --Succeed--> SUCCEEDED
//!     |                     |
//!     |                     +------Fail------> FAILED
//!     +----Fail(Cancelled)-------------------> FAILED
//! ```
//!
//! Los estados terminales (SUCCEEDED, FAILED) no aceptan más transiciones.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{StoreError, SubmitError};
use crate::extraction::{ExtractionError, ExtractionOptions};

/// Estado de un job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Job en cola esperando un worker
    Pending,

    /// Job ejecutándose en un worker
    Running,

    /// Job terminado con artefacto publicado
    Succeeded,

    /// Job terminado con error
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categoría de error de un job fallido
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    DriverUnavailable,
    Timeout,
    Cancelled,
    ExtractionFailed,
    PersistenceError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::DriverUnavailable => "DriverUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::PersistenceError => "PersistenceError",
        }
    }

    /// Indica si tiene sentido que el cliente reintente con un job nuevo
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::DriverUnavailable | ErrorKind::Timeout | ErrorKind::PersistenceError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error registrado en un job FAILED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}

impl From<ExtractionError> for JobError {
    fn from(error: ExtractionError) -> Self {
        match &error {
            ExtractionError::DriverUnavailable(_) => {
                JobError::new(ErrorKind::DriverUnavailable, error.to_string())
            }
            ExtractionError::NotFound(_)
            | ExtractionError::Blocked(_)
            | ExtractionError::ParseError(_) => {
                JobError::new(ErrorKind::ExtractionFailed, error.to_string())
            }
        }
    }
}

/// Entrada de un job. Se fija al crear el job y nunca cambia.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInput {
    pub location_reference: String,
    #[serde(skip_serializing_if = "ExtractionOptions::is_empty")]
    pub options: ExtractionOptions,
}

impl JobInput {
    /// Valida la referencia de ubicación (URL http/https con host)
    pub fn parse(location_reference: &str, options: ExtractionOptions) -> Result<Self, SubmitError> {
        let location_reference = location_reference.trim();
        if location_reference.is_empty() {
            return Err(SubmitError::InvalidInput(
                "location reference is empty".to_string(),
            ));
        }

        let url = Url::parse(location_reference).map_err(|e| {
            SubmitError::InvalidInput(format!("location reference is not a valid URL: {}", e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SubmitError::InvalidInput(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(SubmitError::InvalidInput(
                "location reference has no host".to_string(),
            ));
        }

        if options.max_scrolls == Some(0) {
            return Err(SubmitError::InvalidInput(
                "max_scrolls must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            location_reference: location_reference.to_string(),
            options,
        })
    }
}

/// Referencia al artefacto publicado de un job SUCCEEDED
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub record_count: usize,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Transición solicitada al store
#[derive(Debug, Clone)]
pub enum Transition {
    Dispatch,
    Succeed(ArtifactRef),
    Fail(JobError),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Dispatch => "dispatch",
            Transition::Succeed(_) => "succeed",
            Transition::Fail(_) => "fail",
        }
    }
}

/// Registro de un job
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    #[serde(flatten)]
    pub input: Arc<JobInput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl Job {
    pub fn new(id: String, input: Arc<JobInput>) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Pending,
            input,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            result_ref: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Aplica una transición si la máquina de estados la permite.
    ///
    /// Si la transición es rechazada el registro queda intacto.
    pub fn apply(&mut self, transition: Transition) -> Result<(), StoreError> {
        let now = Utc::now();

        match (self.state, transition) {
            (JobState::Pending, Transition::Dispatch) => {
                self.state = JobState::Running;
                self.started_at = Some(now);
            }
            (JobState::Running, Transition::Succeed(artifact)) => {
                self.state = JobState::Succeeded;
                self.result_ref = Some(artifact);
                self.finished_at = Some(now);
            }
            (JobState::Running, Transition::Fail(error)) => {
                self.state = JobState::Failed;
                self.error = Some(error);
                self.finished_at = Some(now);
            }
            (JobState::Pending, Transition::Fail(error)) if error.kind == ErrorKind::Cancelled => {
                self.state = JobState::Failed;
                self.error = Some(error);
                self.finished_at = Some(now);
            }
            (from, transition) => {
                return Err(StoreError::InvalidTransition {
                    id: self.id.clone(),
                    from,
                    transition: transition.name(),
                });
            }
        }

        self.updated_at = now;
        Ok(())
    }
}
