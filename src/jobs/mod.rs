//! # Sistema de Jobs
//! src/jobs/mod.rs
//!
//! Ciclo de vida de los jobs de extracción: creación, cola, ejecución en un
//! pool de workers acotado, publicación del resultado y consultas.
//!
//! ## Endpoints
//!
//! - `POST /scrape` - Crear job (asíncrono o síncrono)
//! - `GET /job/{id}` - Consultar estado
//! - `POST /job/{id}/cancel` - Cancelar job
//! - `GET /download/{id}` - Descargar reseñas

pub mod handlers;
pub mod materializer;
pub mod query;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod types;

pub use materializer::ResultMaterializer;
pub use query::{ArtifactLookup, HealthReport, JobQueries};
pub use scheduler::{JobScheduler, SchedulerConfig, SchedulerStats};
pub use store::JobStore;
pub use types::{ArtifactRef, ErrorKind, Job, JobError, JobInput, JobState, Transition};
