//! # Maps Review Scraper
//! src/lib.rs
//!
//! Servicio HTTP que extrae reseñas de la ficha de un lugar en un servicio
//! de mapas. Cada pedido se convierte en un job que pasa por
//! PENDING → RUNNING → SUCCEEDED | FAILED y que se ejecuta en un pool
//! acotado de workers, cada uno con su propia sesión de navegador.
//!
//! ## Arquitectura
//!
//! - `jobs`: store, cola, scheduler, materializador de resultados y handlers
//! - `extraction`: contrato del adaptador de extracción e implementación WebDriver
//! - `router`: router axum con request-id, trazas y métricas
//! - `server`: armado del servicio y apagado ordenado
//! - `metrics`: recolección de métricas
//! - `config`: CLI y variables de entorno
//! - `error`: tipos de error por componente
//!
//! ## Ejemplo de uso
//!
//! ```ignore
//! use maps_review_scraper::config::Config;
//! use maps_review_scraper::server::Server;
//!
//! let server = Server::new(Config::default())?;
//! server.run().await?;
//! ```

pub mod config;
pub mod error;
pub mod extraction;
pub mod jobs;
pub mod metrics;
pub mod router;
pub mod server;
