//! # Extracción de Reseñas
//! src/extraction/mod.rs
//!
//! Contrato entre el scheduler y el mecanismo que realmente obtiene las
//! reseñas de una ubicación. El scheduler solo conoce [`ExtractionAdapter`];
//! la implementación real habla WebDriver y la de pruebas es determinista.

pub mod fake;
pub mod session;
pub mod webdriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fake::FakeAdapter;
pub use webdriver::{WebDriverAdapter, WebDriverSettings};

/// Una reseña extraída
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub review_id: String,
    pub reviewer: String,
    pub rating: String,
    pub review_text: String,
    pub date: String,
    pub company_name: String,
    pub phone_number: String,
}

/// Ajustes por job que sobrescriben los valores del servidor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scrolls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_pause_ms: Option<u64>,
}

impl ExtractionOptions {
    pub fn is_empty(&self) -> bool {
        self.max_scrolls.is_none() && self.scroll_pause_ms.is_none()
    }
}

/// Fallo de un intento de extracción
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("location not found: {0}")]
    NotFound(String),

    #[error("blocked by upstream: {0}")]
    Blocked(String),

    #[error("failed to parse page: {0}")]
    ParseError(String),

    #[error("browser driver unavailable: {0}")]
    DriverUnavailable(String),
}

impl ExtractionError {
    pub fn category(&self) -> &'static str {
        match self {
            ExtractionError::NotFound(_) => "not_found",
            ExtractionError::Blocked(_) => "blocked",
            ExtractionError::ParseError(_) => "parse_error",
            ExtractionError::DriverUnavailable(_) => "driver_unavailable",
        }
    }
}

/// Mecanismo de extracción usado por los workers.
///
/// Cada llamada a `extract` es un intento independiente: debe adquirir y
/// liberar sus propios recursos de navegador. El scheduler puede abandonar
/// el futuro en cualquier punto de espera (timeout o cancelación), así que
/// la liberación no puede depender de llegar al final de la función.
#[async_trait]
pub trait ExtractionAdapter: Send + Sync {
    async fn extract(
        &self,
        location_reference: &str,
        options: &ExtractionOptions,
    ) -> Result<Vec<ReviewRecord>, ExtractionError>;

    /// Comprueba si el backend de navegador responde
    async fn probe(&self) -> bool;

    /// Descripción corta del backend (para /health)
    fn describe(&self) -> String;
}
