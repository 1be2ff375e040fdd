//! # Configuración del Servicio
//! src/config.rs
//!
//! Configuración del servicio de extracción con soporte para argumentos CLI
//! y variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./maps_review_scraper --port 8000 \
//!   --workers 2 \
//!   --queue-capacity 100 \
//!   --timeout-ms 300000 \
//!   --webdriver-url http://127.0.0.1:9515
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=8000 WEBDRIVER_URL=http://selenium:4444/wd/hub ./maps_review_scraper
//! ```

use clap::{ArgAction, Parser};
use tracing::info;
use url::Url;

use crate::error::ConfigError;

/// Configuración del servicio
#[derive(Debug, Clone, Parser)]
#[command(name = "maps_review_scraper")]
#[command(about = "Servicio HTTP de extracción de reseñas con jobs asíncronos")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "8000", env = "HTTP_PORT")]
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "HTTP_HOST")]
    pub host: String,

    /// Directorio donde se escriben los artefactos de resultados
    #[arg(long = "output-dir", default_value = "./output", env = "OUTPUT_DIR")]
    pub output_dir: String,

    // === Workers y cola ===
    /// Número de workers (= sesiones de navegador simultáneas)
    #[arg(long, default_value = "2", env = "SCRAPE_WORKERS")]
    pub workers: usize,

    /// Capacidad máxima de jobs pendientes
    #[arg(long = "queue-capacity", default_value = "100", env = "SCRAPE_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Tiempo máximo de un intento de extracción en milisegundos
    #[arg(long = "timeout-ms", default_value = "300000", env = "SCRAPE_TIMEOUT_MS")]
    pub timeout_ms: u64,

    // === Navegador ===
    /// Endpoint WebDriver (chromedriver, selenium)
    #[arg(long = "webdriver-url", default_value = "http://127.0.0.1:9515", env = "WEBDRIVER_URL")]
    pub webdriver_url: String,

    /// Ejecutar el navegador sin ventana
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "SCRAPE_HEADLESS")]
    pub headless: bool,

    /// Máximo de rondas de scroll sobre la lista de reseñas
    #[arg(long = "max-scrolls", default_value = "500", env = "SCRAPE_MAX_SCROLLS")]
    pub max_scrolls: u32,

    /// Pausa entre rondas de scroll en milisegundos
    #[arg(long = "scroll-pause-ms", default_value = "1500", env = "SCRAPE_SCROLL_PAUSE_MS")]
    pub scroll_pause_ms: u64,

    /// Espera después de cargar la página en milisegundos
    #[arg(long = "page-load-wait-ms", default_value = "6000", env = "SCRAPE_PAGE_LOAD_WAIT_MS")]
    pub page_load_wait_ms: u64,

    // === Backpressure y mantenimiento ===
    /// Segundos sugeridos en `Retry-After` cuando la cola está llena
    #[arg(long = "retry-after-secs", default_value = "5", env = "RETRY_AFTER_SECS")]
    pub retry_after_secs: u64,

    /// Tiempo en segundos que se conservan los jobs terminados (0 = siempre)
    #[arg(long = "jobs-retention-secs", default_value = "3600", env = "JOBS_RETENTION_SECS")]
    pub jobs_retention_secs: u64,
}

impl Config {
    /// Obtiene la dirección completa para bind (host:port)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Valida la configuración
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Validation("Workers must be >= 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "Queue capacity must be >= 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Extraction timeout must be > 0".to_string(),
            ));
        }
        if self.max_scrolls == 0 {
            return Err(ConfigError::Validation("Max scrolls must be >= 1".to_string()));
        }

        let url = Url::parse(&self.webdriver_url).map_err(|e| {
            ConfigError::Validation(format!("Invalid WebDriver URL '{}': {}", self.webdriver_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "WebDriver URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        Ok(())
    }

    /// Registra un resumen de la configuración
    pub fn log_summary(&self) {
        info!(
            address = %self.address(),
            output_dir = %self.output_dir,
            "network"
        );
        info!(
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            timeout_ms = self.timeout_ms,
            retry_after_secs = self.retry_after_secs,
            "job scheduler"
        );
        info!(
            webdriver_url = %self.webdriver_url,
            headless = self.headless,
            max_scrolls = self.max_scrolls,
            scroll_pause_ms = self.scroll_pause_ms,
            page_load_wait_ms = self.page_load_wait_ms,
            "browser"
        );
        if self.jobs_retention_secs > 0 {
            info!(
                retention_secs = self.jobs_retention_secs,
                "finished jobs are evicted after the retention window"
            );
        } else {
            info!("finished jobs are kept until restart");
        }
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            port: 8000,
            host: "127.0.0.1".to_string(),
            output_dir: "./output".to_string(),
            workers: 2,
            queue_capacity: 100,
            timeout_ms: 300_000,
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            headless: true,
            max_scrolls: 500,
            scroll_pause_ms: 1_500,
            page_load_wait_ms: 6_000,
            retry_after_secs: 5,
            jobs_retention_secs: 3600,
        }
    }
}
