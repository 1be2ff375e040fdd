//! # Consultas de Jobs
//! src/jobs/query.rs
//!
//! Operaciones de solo lectura: estado de un job, artefacto de un job
//! terminado y salud del backend de extracción.

use std::sync::Arc;

use serde::Serialize;

use super::materializer::ResultMaterializer;
use super::store::JobStore;
use super::types::{ArtifactRef, Job, JobState};
use crate::error::MaterializeError;
use crate::extraction::ExtractionAdapter;

/// Resultado de buscar el artefacto de un job
#[derive(Debug)]
pub enum ArtifactLookup {
    Ready { bytes: Vec<u8>, artifact: ArtifactRef },
    NotReady(JobState),
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub adapter_reachable: bool,
    pub adapter: String,
}

#[derive(Clone)]
pub struct JobQueries {
    store: Arc<JobStore>,
    materializer: Arc<ResultMaterializer>,
    adapter: Arc<dyn ExtractionAdapter>,
}

impl JobQueries {
    pub fn new(
        store: Arc<JobStore>,
        materializer: Arc<ResultMaterializer>,
        adapter: Arc<dyn ExtractionAdapter>,
    ) -> Self {
        Self {
            store,
            materializer,
            adapter,
        }
    }

    pub fn status(&self, job_id: &str) -> Option<Job> {
        self.store.get(job_id).ok()
    }

    /// Lee el artefacto de un job SUCCEEDED.
    ///
    /// Un job que no terminó bien nunca expone bytes.
    pub async fn artifact(&self, job_id: &str) -> Result<ArtifactLookup, MaterializeError> {
        let Some(job) = self.status(job_id) else {
            return Ok(ArtifactLookup::NotFound);
        };

        match (job.state, job.result_ref) {
            (JobState::Succeeded, Some(artifact)) => {
                let bytes = self.materializer.read(&artifact).await?;
                Ok(ArtifactLookup::Ready { bytes, artifact })
            }
            (state, _) => Ok(ArtifactLookup::NotReady(state)),
        }
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            adapter_reachable: self.adapter.probe().await,
            adapter: self.adapter.describe(),
        }
    }
}
