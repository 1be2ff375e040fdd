//! # Job Store
//! src/jobs/store.rs
//!
//! Registro autoritativo de jobs en memoria. Todas las lecturas devuelven
//! snapshots (clones); el único punto de escritura es [`JobStore::update`],
//! que valida la transición y la aplica de forma atómica por job.
//!
//! ## Concurrencia
//! - El mapa de jobs está detrás de un `RwLock` que solo se toma para
//!   insertar, buscar o eliminar entradas.
//! - Cada job tiene su propio `Mutex`, así que actualizar un job no bloquea
//!   a los demás.
//! - Cada job publica su estado en un canal `watch` para que los modos
//!   síncronos puedan esperar el estado terminal sin hacer polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use super::types::{Job, JobInput, JobState, Transition};
use crate::error::StoreError;

struct JobSlot {
    input: Arc<JobInput>,
    job: Mutex<Job>,
    state_tx: watch::Sender<JobState>,
}

impl JobSlot {
    fn snapshot(&self) -> Job {
        lock(&self.job).clone()
    }
}

pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<JobSlot>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Crea un job PENDING con un id nuevo
    pub fn create(&self, input: JobInput) -> Job {
        let input = Arc::new(input);
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);

        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !jobs.contains_key(&candidate) {
                break candidate;
            }
        };

        let job = Job::new(id.clone(), Arc::clone(&input));
        let (state_tx, _) = watch::channel(JobState::Pending);

        jobs.insert(
            id,
            Arc::new(JobSlot {
                input,
                job: Mutex::new(job.clone()),
                state_tx,
            }),
        );

        job
    }

    fn slot(&self, id: &str) -> Result<Arc<JobSlot>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Snapshot del registro actual
    pub fn get(&self, id: &str) -> Result<Job, StoreError> {
        self.slot(id).map(|slot| slot.snapshot())
    }

    /// Entrada del job, sin tomar el lock del registro
    pub fn input(&self, id: &str) -> Result<Arc<JobInput>, StoreError> {
        self.slot(id).map(|slot| Arc::clone(&slot.input))
    }

    /// Aplica una transición y devuelve el registro resultante.
    ///
    /// Si la transición no es válida para el estado actual devuelve
    /// `InvalidTransition` y el registro no cambia.
    pub fn update(&self, id: &str, transition: Transition) -> Result<Job, StoreError> {
        let slot = self.slot(id)?;
        let mut job = lock(&slot.job);
        job.apply(transition)?;
        slot.state_tx.send_replace(job.state);
        Ok(job.clone())
    }

    /// Espera a que el job llegue a un estado terminal
    pub async fn wait_terminal(&self, id: &str) -> Result<Job, StoreError> {
        let slot = self.slot(id)?;
        let mut rx = slot.state_tx.subscribe();

        // El sender vive en el slot que tenemos retenido, así que el canal
        // no puede cerrarse mientras esperamos.
        let _ = rx.wait_for(|state| state.is_terminal()).await;

        Ok(slot.snapshot())
    }

    /// Elimina un job. Solo se usa para deshacer una creación que no pudo encolarse.
    pub fn remove(&self, id: &str) -> Option<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.remove(id).map(|slot| slot.snapshot())
    }

    /// Elimina los jobs terminales que terminaron antes de `cutoff`
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, slot)| {
                let job = lock(&slot.job);
                job.is_terminal() && job.finished_at.map_or(false, |t| t < cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id))
            .map(|slot| slot.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cantidad de jobs por estado
    pub fn count_by_state(&self) -> HashMap<JobState, usize> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = HashMap::new();
        for slot in jobs.values() {
            *counts.entry(lock(&slot.job).state).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
