//! # Adaptador Falso
//! src/extraction/fake.rs
//!
//! Adaptador determinista para pruebas: devuelve registros fijos o un error
//! fijo, opcionalmente después de un retardo.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{ExtractionAdapter, ExtractionError, ExtractionOptions, ReviewRecord};

pub struct FakeAdapter {
    outcome: Result<Vec<ReviewRecord>, ExtractionError>,
    delay: Duration,
    reachable: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    on_extract: Mutex<Option<ExtractHook>>,
}

type ExtractHook = Box<dyn Fn() + Send + Sync>;

impl FakeAdapter {
    pub fn returning(records: Vec<ReviewRecord>) -> Self {
        Self::with_outcome(Ok(records))
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self::with_outcome(Err(error))
    }

    fn with_outcome(outcome: Result<Vec<ReviewRecord>, ExtractionError>) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            reachable: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            on_extract: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Callback que corre al final de cada `extract`, justo antes de retornar
    pub fn on_extract(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_extract.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Veces que se llamó `extract`
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Llamadas a `extract` que aún no terminaron ni fueron abandonadas
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractionAdapter for FakeAdapter {
    async fn extract(
        &self,
        _location_reference: &str,
        _options: &ExtractionOptions,
    ) -> Result<Vec<ReviewRecord>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(hook) = self
            .on_extract
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            hook();
        }
        self.outcome.clone()
    }

    async fn probe(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

/// Genera `count` reseñas de ejemplo
pub fn sample_reviews(count: usize) -> Vec<ReviewRecord> {
    (1..=count)
        .map(|i| ReviewRecord {
            review_id: format!("review-{}", i),
            reviewer: format!("Reviewer {}", i),
            rating: format!("{} stars", (i % 5) + 1),
            review_text: format!("Review text number {}", i),
            date: "a month ago".to_string(),
            company_name: "Test Place".to_string(),
            phone_number: "+1 555 0100".to_string(),
        })
        .collect()
}
