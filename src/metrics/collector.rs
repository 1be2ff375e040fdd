//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Recolecta y agrega métricas del servicio en tiempo real: requests HTTP,
//! resultados de jobs y duración de los intentos de extracción.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};

use crate::jobs::types::{Job, JobState};

/// Máximo de muestras guardadas por ventana
const MAX_SAMPLES: usize = 10_000;

/// Collector de métricas thread-safe
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsData>>,
    start_time: Instant,
}

/// Datos internos de métricas
struct MetricsData {
    total_requests: u64,

    /// Requests por código de estado
    status_codes: HashMap<u16, u64>,

    /// Latencias HTTP (microsegundos)
    latencies: VecDeque<u64>,

    /// Requests por ruta (patrón de ruta, no la URL concreta)
    requests_per_path: HashMap<String, u64>,

    jobs_succeeded: u64,

    /// Jobs fallidos por categoría de error
    jobs_failed: HashMap<String, u64>,

    /// Duración de los intentos de extracción (milisegundos)
    extraction_ms: VecDeque<u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsData {
                total_requests: 0,
                status_codes: HashMap::new(),
                latencies: VecDeque::with_capacity(MAX_SAMPLES),
                requests_per_path: HashMap::new(),
                jobs_succeeded: 0,
                jobs_failed: HashMap::new(),
                extraction_ms: VecDeque::new(),
            })),
            start_time: Instant::now(),
        }
    }

    fn data(&self) -> MutexGuard<'_, MetricsData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registra un request HTTP
    pub fn record_request(&self, path: &str, status_code: u16, latency: Duration) {
        let mut data = self.data();

        data.total_requests += 1;
        *data.status_codes.entry(status_code).or_insert(0) += 1;
        push_sample(&mut data.latencies, latency.as_micros() as u64);
        *data.requests_per_path.entry(path.to_string()).or_insert(0) += 1;
    }

    /// Registra el resultado terminal de un job
    pub fn record_job_outcome(&self, job: &Job) {
        let mut data = self.data();

        match (job.state, &job.error) {
            (JobState::Succeeded, _) => data.jobs_succeeded += 1,
            (JobState::Failed, Some(error)) => {
                *data
                    .jobs_failed
                    .entry(error.kind.as_str().to_string())
                    .or_insert(0) += 1;
            }
            _ => {}
        }
    }

    /// Registra la duración de un intento de extracción
    pub fn record_extraction(&self, elapsed: Duration) {
        let mut data = self.data();
        push_sample(&mut data.extraction_ms, elapsed.as_millis() as u64);
    }

    /// Métricas actuales en JSON
    pub fn get_metrics_json(&self) -> Value {
        let data = self.data();

        let latency = Percentiles::from_samples(&data.latencies);
        let extraction = Percentiles::from_samples(&data.extraction_ms);

        // Top 10 rutas más accedidas
        let mut paths: Vec<_> = data.requests_per_path.iter().collect();
        paths.sort_by(|a, b| b.1.cmp(a.1));
        let top_paths: Vec<Value> = paths
            .iter()
            .take(10)
            .map(|(path, count)| json!({ "path": path, "count": count }))
            .collect();

        let status_codes: HashMap<String, u64> = data
            .status_codes
            .iter()
            .map(|(code, count)| (code.to_string(), *count))
            .collect();

        json!({
            "server": {
                "uptime_seconds": self.start_time.elapsed().as_secs(),
            },
            "requests": {
                "total": data.total_requests,
                "status_codes": status_codes,
                "top_paths": top_paths,
            },
            "latency_us": latency,
            "jobs": {
                "succeeded": data.jobs_succeeded,
                "failed": data.jobs_failed,
            },
            "extraction_ms": extraction,
        })
    }

    /// Snapshot de métricas
    pub fn get_snapshot(&self) -> MetricsSnapshot {
        let data = self.data();
        let latency = Percentiles::from_samples(&data.latencies);

        MetricsSnapshot {
            total_requests: data.total_requests,
            uptime_secs: self.start_time.elapsed().as_secs(),
            latency_p50_us: latency.p50,
            latency_p95_us: latency.p95,
            latency_p99_us: latency.p99,
            latency_avg_us: latency.avg,
            jobs_succeeded: data.jobs_succeeded,
            jobs_failed: data.jobs_failed.values().sum(),
            extractions: data.extraction_ms.len() as u64,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn push_sample(samples: &mut VecDeque<u64>, value: u64) {
    if samples.len() >= MAX_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(value);
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
struct Percentiles {
    p50: u64,
    p95: u64,
    p99: u64,
    avg: u64,
    stddev: f64,
    samples: usize,
}

impl Percentiles {
    fn from_samples(samples: &VecDeque<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();

        let len = sorted.len();
        let avg = sorted.iter().sum::<u64>() / len as u64;

        let variance = sorted
            .iter()
            .map(|&x| {
                let diff = x as f64 - avg as f64;
                diff * diff
            })
            .sum::<f64>()
            / len as f64;

        Self {
            p50: sorted[len * 50 / 100],
            p95: sorted[len * 95 / 100],
            p99: sorted[len * 99 / 100],
            avg,
            stddev: (variance.sqrt() * 100.0).round() / 100.0,
            samples: len,
        }
    }
}

/// Snapshot de métricas (para uso externo)
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub uptime_secs: u64,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_p99_us: u64,
    pub latency_avg_us: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub extractions: u64,
}
