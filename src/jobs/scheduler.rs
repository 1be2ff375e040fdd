//! # Scheduler de Jobs
//! src/jobs/scheduler.rs
//!
//! Coordina la ejecución de jobs: validación, encolado, pool de workers,
//! timeout por intento, cancelación y publicación del resultado.
//!
//! Un worker que toma un job:
//! 1. Lo pasa a RUNNING (si ya no está PENDING, lo descarta)
//! 2. Ejecuta `extract` acotado por el timeout y por su token de cancelación
//! 3. Escribe el artefacto y recién entonces lo publica con SUCCEEDED
//! 4. Si la transición final es rechazada (otro actor ya cerró el job),
//!    borra el artefacto que había escrito

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::materializer::ResultMaterializer;
use super::queue::JobQueue;
use super::store::JobStore;
use super::types::{ErrorKind, Job, JobError, JobInput, JobState, Transition};
use crate::config::Config;
use crate::error::{StoreError, SubmitError};
use crate::extraction::{ExtractionAdapter, ExtractionOptions};
use crate::metrics::MetricsCollector;

/// Configuración del scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Número de workers (extracciones simultáneas)
    pub workers: usize,

    /// Capacidad máxima de la cola de pendientes
    pub queue_capacity: usize,

    /// Tiempo máximo de un intento de extracción
    pub extraction_timeout: Duration,

    /// Tiempo que un job terminal se conserva antes de ser eliminado.
    /// `None` desactiva la limpieza.
    pub retention: Option<Duration>,

    /// Cada cuánto corre la limpieza
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 100,
            extraction_timeout: Duration::from_secs(300),
            retention: Some(Duration::from_secs(3600)),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Crea una configuración desde el Config principal
    pub fn from_config(config: &Config) -> Self {
        let retention = match config.jobs_retention_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            extraction_timeout: Duration::from_millis(config.timeout_ms),
            retention,
            sweep_interval: retention
                .map(|r| r.min(Duration::from_secs(60)))
                .unwrap_or(Duration::from_secs(60)),
        }
    }
}

/// Estadísticas del scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub queue_capacity: usize,
    pub running: usize,
    pub workers: usize,
    pub tracked_jobs: usize,
    pub jobs_by_state: HashMap<JobState, usize>,
}

/// Scheduler de jobs. Clonarlo es barato (comparte el estado interno).
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    store: Arc<JobStore>,
    queue: JobQueue,
    adapter: Arc<dyn ExtractionAdapter>,
    materializer: Arc<ResultMaterializer>,
    metrics: MetricsCollector,

    /// Tokens de cancelación de los jobs en ejecución (job_id -> token)
    running: Mutex<HashMap<String, CancellationToken>>,

    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Crea el scheduler sin iniciar los workers (ver [`JobScheduler::start`])
    pub fn new(
        config: SchedulerConfig,
        store: Arc<JobStore>,
        adapter: Arc<dyn ExtractionAdapter>,
        materializer: Arc<ResultMaterializer>,
        metrics: MetricsCollector,
    ) -> Self {
        let queue = JobQueue::new(config.queue_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                queue,
                adapter,
                materializer,
                metrics,
                running: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.inner.store
    }

    /// Inicia los workers y la limpieza periódica. Llamarlo de nuevo no hace nada.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = lock(&self.inner.tasks);
        for worker_id in 0..self.inner.config.workers {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(worker_loop(inner, worker_id)));
        }

        if let Some(retention) = self.inner.config.retention {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(sweep_loop(inner, retention)));
        }

        info!(
            workers = self.inner.config.workers,
            queue_capacity = self.inner.config.queue_capacity,
            timeout_ms = self.inner.config.extraction_timeout.as_millis() as u64,
            "job scheduler started"
        );
    }

    /// Valida la entrada, crea el job PENDING y lo encola.
    ///
    /// Si la cola está llena el job no queda registrado.
    pub fn submit(
        &self,
        location_reference: &str,
        options: ExtractionOptions,
    ) -> Result<Job, SubmitError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        let input = JobInput::parse(location_reference, options)?;
        let job = self.inner.store.create(input);

        if let Err(e) = self.inner.queue.enqueue(job.id.clone()) {
            self.inner.store.remove(&job.id);
            warn!(error = %e, "job rejected");
            return Err(e);
        }

        // El apagado pudo vaciar la cola entre el chequeo inicial y el encolado
        if self.inner.shutdown.is_cancelled() && self.inner.queue.remove_by_id(&job.id) {
            self.inner.store.remove(&job.id);
            return Err(SubmitError::ShuttingDown);
        }

        info!(job_id = %job.id, location = %job.input.location_reference, "job queued");
        Ok(job)
    }

    /// Crea el job y espera su estado terminal (modo síncrono)
    pub async fn submit_and_wait(
        &self,
        location_reference: &str,
        options: ExtractionOptions,
    ) -> Result<Job, SubmitError> {
        let job = self.submit(location_reference, options)?;
        let finished = self.inner.store.wait_terminal(&job.id).await?;
        Ok(finished)
    }

    /// Cancela un job PENDING o RUNNING.
    ///
    /// El job queda FAILED/Cancelled de inmediato; si estaba corriendo,
    /// el worker abandona la extracción en su siguiente punto de espera.
    pub fn cancel(&self, job_id: &str) -> Result<Job, StoreError> {
        let job = self.inner.store.update(
            job_id,
            Transition::Fail(JobError::cancelled("job cancelled by request")),
        )?;

        self.inner.queue.remove_by_id(job_id);
        if let Some(token) = lock(&self.inner.running).get(job_id) {
            token.cancel();
        }

        info!(job_id, "job cancelled");
        self.inner.metrics.record_job_outcome(&job);
        Ok(job)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.inner.queue.len(),
            queue_capacity: self.inner.queue.max_capacity(),
            running: lock(&self.inner.running).len(),
            workers: self.inner.config.workers,
            tracked_jobs: self.inner.store.len(),
            jobs_by_state: self.inner.store.count_by_state(),
        }
    }

    /// Elimina los jobs terminales más viejos que la retención, junto con sus artefactos
    pub async fn evict_expired(&self) -> usize {
        match self.inner.config.retention {
            Some(retention) => self.inner.evict_expired(retention).await,
            None => 0,
        }
    }

    /// Detiene los workers. Los jobs en ejecución terminan como Cancelled y
    /// los pendientes se marcan Cancelled sin ejecutarse.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("job scheduler shutting down");
        self.inner.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "scheduler task panicked");
            }
        }

        for job_id in self.inner.queue.drain() {
            let cancelled = self.inner.store.update(
                &job_id,
                Transition::Fail(JobError::cancelled("service shutting down")),
            );
            if let Ok(job) = cancelled {
                self.inner.metrics.record_job_outcome(&job);
            }
        }

        info!("job scheduler stopped");
    }
}

// ==================== WORKERS ====================

async fn worker_loop(inner: Arc<Inner>, worker_id: usize) {
    debug!(worker_id, "worker started");

    loop {
        let job_id = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            job_id = inner.queue.dequeue() => job_id,
        };

        inner.run_job(&job_id, worker_id).await;
    }

    debug!(worker_id, "worker stopped");
}

async fn sweep_loop(inner: Arc<Inner>, retention: Duration) {
    let period = inner.config.sweep_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        inner.evict_expired(retention).await;
    }
}

impl Inner {
    async fn run_job(&self, job_id: &str, worker_id: usize) {
        let input = match self.store.input(job_id) {
            Ok(input) => input,
            Err(e) => {
                debug!(job_id, error = %e, "dequeued job no longer exists");
                return;
            }
        };

        let token = self.shutdown.child_token();
        lock(&self.running).insert(job_id.to_string(), token.clone());

        self.execute(job_id, &input, &token, worker_id).await;

        lock(&self.running).remove(job_id);
    }

    async fn execute(
        &self,
        job_id: &str,
        input: &JobInput,
        token: &CancellationToken,
        worker_id: usize,
    ) {
        if let Err(e) = self.store.update(job_id, Transition::Dispatch) {
            debug!(job_id, error = %e, "skipping job that is no longer pending");
            return;
        }
        info!(job_id, worker_id, "job running");

        let started = Instant::now();
        let timeout = self.config.extraction_timeout;

        let attempt = tokio::select! {
            biased;
            _ = token.cancelled() => Err(JobError::cancelled("extraction cancelled")),
            result = tokio::time::timeout(
                timeout,
                self.adapter.extract(&input.location_reference, &input.options),
            ) => match result {
                Ok(Ok(records)) => Ok(records),
                Ok(Err(e)) => {
                    warn!(job_id, category = e.category(), error = %e, "extraction failed");
                    Err(JobError::from(e))
                }
                Err(_) => Err(JobError::new(
                    ErrorKind::Timeout,
                    format!("extraction exceeded {} ms", timeout.as_millis()),
                )),
            },
        };

        self.metrics.record_extraction(started.elapsed());

        let transition = match attempt {
            Ok(records) => match self.materializer.write(job_id, &records).await {
                Ok(artifact) => Transition::Succeed(artifact),
                Err(e) => {
                    error!(job_id, error = %e, "failed to write artifact");
                    Transition::Fail(JobError::new(ErrorKind::PersistenceError, e.to_string()))
                }
            },
            Err(error) => Transition::Fail(error),
        };

        self.finish(job_id, transition).await;
    }

    async fn finish(&self, job_id: &str, transition: Transition) {
        let wrote_artifact = matches!(transition, Transition::Succeed(_));

        match self.store.update(job_id, transition) {
            Ok(job) => {
                match (&job.state, &job.error) {
                    (JobState::Failed, Some(error)) => {
                        info!(job_id, error_kind = %error.kind, "job failed")
                    }
                    _ => info!(
                        job_id,
                        reviews = job.result_ref.as_ref().map_or(0, |r| r.record_count),
                        "job succeeded"
                    ),
                }
                self.metrics.record_job_outcome(&job);
            }
            Err(e) => {
                debug!(job_id, error = %e, "final transition rejected");
                if wrote_artifact {
                    if let Err(e) = self.materializer.discard(job_id).await {
                        warn!(job_id, error = %e, "failed to discard unpublished artifact");
                    }
                }
            }
        }
    }

    async fn evict_expired(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };

        let evicted = self.store.evict_finished_before(cutoff);
        for job in &evicted {
            if job.result_ref.is_some() {
                if let Err(e) = self.materializer.discard(&job.id).await {
                    warn!(job_id = %job.id, error = %e, "failed to delete expired artifact");
                }
            }
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), "expired jobs evicted");
        }
        evicted.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
