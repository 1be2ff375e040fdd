//! # Sesiones de Navegador
//! src/extraction/session.rs
//!
//! Pool acotado de sesiones WebDriver. Cada intento de extracción hace
//! `checkout` de una sesión propia; la sesión se cierra con `release` o,
//! si el intento es abandonado (timeout/cancelación), desde `Drop`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use url::Url;

use super::ExtractionError;

const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// Pool de sesiones contra un endpoint WebDriver
pub struct BrowserPool {
    client: reqwest::Client,
    base_url: Url,
    capabilities: Value,
    permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl BrowserPool {
    pub fn new(
        client: reqwest::Client,
        base_url: Url,
        capabilities: Value,
        max_sessions: usize,
    ) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            client,
            base_url,
            capabilities,
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Sesiones que aún se pueden abrir sin esperar
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Abre una sesión nueva, esperando un cupo si el pool está lleno.
    ///
    /// El `POST /session` corre en una tarea propia. Si quien llamó abandona
    /// la espera (timeout o cancelación), la sesión que el driver termine de
    /// crear se descarta y su `Drop` la cierra.
    pub async fn checkout(&self) -> Result<BrowserSession, ExtractionError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExtractionError::DriverUnavailable("browser pool closed".to_string()))?;

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let capabilities = self.capabilities.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let opened = create_session(&client, &base_url, &capabilities)
                .await
                .map(|session_id| BrowserSession {
                    session_url: endpoint(&base_url, &format!("session/{}", session_id)),
                    client,
                    session_id,
                    permit: Some(permit),
                });

            if let Err(Ok(orphan)) = tx.send(opened) {
                debug!(session_id = %orphan.session_id, "checkout abandoned, closing new session");
            }
        });

        let session = rx.await.map_err(|_| {
            ExtractionError::DriverUnavailable("session creation task aborted".to_string())
        })??;

        debug!(session_id = %session.session_id, "browser session opened");
        Ok(session)
    }

    /// Consulta `/status` del driver
    pub async fn ready(&self) -> bool {
        let request = self
            .client
            .get(endpoint(&self.base_url, "status"))
            .timeout(STATUS_TIMEOUT)
            .send();

        match request.await {
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(body) => body
                        .pointer("/value/ready")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    Err(_) => false,
                }
            }
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "WebDriver status check failed");
                false
            }
        }
    }
}

/// Sesión de navegador exclusiva de un intento
pub struct BrowserSession {
    client: reqwest::Client,
    session_id: String,
    session_url: String,
    // Se mueve a la tarea de cierre para que el cupo no se libere
    // antes de que el driver cierre la sesión.
    permit: Option<OwnedSemaphorePermit>,
}

impl BrowserSession {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub async fn navigate(&self, url: &str) -> Result<(), ExtractionError> {
        let response = self
            .client
            .post(format!("{}/url", self.session_url))
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(driver_unreachable)?;
        read_value(response).await.map(|_| ())
    }

    /// Ejecuta un script síncrono y deserializa lo que retorna
    pub async fn execute<T: DeserializeOwned>(
        &self,
        script: &str,
        args: Vec<Value>,
    ) -> Result<T, ExtractionError> {
        let response = self
            .client
            .post(format!("{}/execute/sync", self.session_url))
            .json(&json!({ "script": script, "args": args }))
            .send()
            .await
            .map_err(driver_unreachable)?;

        let value = read_value(response).await?;
        serde_json::from_value(value)
            .map_err(|e| ExtractionError::ParseError(format!("unexpected script result: {}", e)))
    }

    /// Cierra la sesión esperando la respuesta del driver
    pub async fn release(mut self) -> Result<(), ExtractionError> {
        let permit = self.permit.take();
        let result = delete_session(&self.client, &self.session_url).await;
        drop(permit);
        debug!(session_id = %self.session_id, "browser session released");
        result
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };

        let client = self.client.clone();
        let session_url = self.session_url.clone();
        let session_id = self.session_id.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = delete_session(&client, &session_url).await {
                        warn!(session_id = %session_id, error = %e, "failed to close abandoned browser session");
                    } else {
                        debug!(session_id = %session_id, "abandoned browser session closed");
                    }
                    drop(permit);
                });
            }
            Err(_) => {
                warn!(session_id = %session_id, "no runtime available, browser session left open");
            }
        }
    }
}

async fn create_session(
    client: &reqwest::Client,
    base_url: &Url,
    capabilities: &Value,
) -> Result<String, ExtractionError> {
    let response = client
        .post(endpoint(base_url, "session"))
        .json(&json!({ "capabilities": { "alwaysMatch": capabilities } }))
        .send()
        .await
        .map_err(driver_unreachable)?;

    let value = read_value(response).await?;
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ExtractionError::DriverUnavailable("WebDriver did not return a session id".to_string())
        })
}

async fn delete_session(client: &reqwest::Client, session_url: &str) -> Result<(), ExtractionError> {
    let response = client
        .delete(session_url)
        .send()
        .await
        .map_err(driver_unreachable)?;
    read_value(response).await.map(|_| ())
}

fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

fn driver_unreachable(error: reqwest::Error) -> ExtractionError {
    ExtractionError::DriverUnavailable(format!("WebDriver request failed: {}", error))
}

/// Extrae `value` de una respuesta WebDriver, traduciendo los errores del protocolo
async fn read_value(response: reqwest::Response) -> Result<Value, ExtractionError> {
    let status = response.status();
    let body: Value = response.json().await.map_err(|e| {
        ExtractionError::DriverUnavailable(format!("invalid WebDriver response ({}): {}", status, e))
    })?;

    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Err(classify_error(error, message))
}

fn classify_error(error: &str, message: &str) -> ExtractionError {
    let detail = format!("{}: {}", error, message);
    match error {
        "session not created" | "invalid session id" | "unknown command" => {
            ExtractionError::DriverUnavailable(detail)
        }
        _ => ExtractionError::ParseError(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};

    #[derive(Clone, Default)]
    struct MockDriver {
        created: Arc<AtomicUsize>,
        deleted: Arc<AtomicUsize>,
        create_delay: Duration,
    }

    async fn spawn_mock_driver(driver: MockDriver) -> Url {
        async fn create(State(d): State<MockDriver>) -> Json<Value> {
            let n = d.created.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(d.create_delay).await;
            Json(json!({ "value": { "sessionId": format!("s{}", n), "capabilities": {} } }))
        }
        async fn remove(State(d): State<MockDriver>) -> Json<Value> {
            d.deleted.fetch_add(1, Ordering::SeqCst);
            Json(json!({ "value": null }))
        }
        async fn status() -> Json<Value> {
            Json(json!({ "value": { "ready": true, "message": "ok" } }))
        }

        let app = Router::new()
            .route("/status", get(status))
            .route("/session", post(create))
            .route("/session/:id", delete(remove))
            .with_state(driver);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    fn pool(url: Url, max_sessions: usize) -> BrowserPool {
        BrowserPool::new(reqwest::Client::new(), url, json!({}), max_sessions)
    }

    #[test]
    fn test_endpoint_join() {
        let base = Url::parse("http://127.0.0.1:4444/wd/hub/").unwrap();
        assert_eq!(endpoint(&base, "session"), "http://127.0.0.1:4444/wd/hub/session");

        let base = Url::parse("http://127.0.0.1:9515").unwrap();
        assert_eq!(endpoint(&base, "status"), "http://127.0.0.1:9515/status");
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error("session not created", "chrome not found"),
            ExtractionError::DriverUnavailable(_)
        ));
        assert!(matches!(
            classify_error("javascript error", "x is undefined"),
            ExtractionError::ParseError(_)
        ));
    }

    #[tokio::test]
    async fn test_release_closes_session_and_frees_slot() {
        let driver = MockDriver::default();
        let pool = pool(spawn_mock_driver(driver.clone()).await, 1);

        let session = pool.checkout().await.unwrap();
        assert_eq!(session.id(), "s0");
        assert_eq!(pool.available(), 0);

        session.release().await.unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(driver.deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_is_closed_in_background() {
        let driver = MockDriver::default();
        let pool = pool(spawn_mock_driver(driver.clone()).await, 1);

        let session = pool.checkout().await.unwrap();
        drop(session);

        for _ in 0..50 {
            if driver.deleted.load(Ordering::SeqCst) == 1 && pool.available() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("abandoned session was not closed");
    }

    #[tokio::test]
    async fn test_abandoned_checkout_closes_late_session() {
        let driver = MockDriver {
            create_delay: Duration::from_millis(300),
            ..MockDriver::default()
        };
        let pool = pool(spawn_mock_driver(driver.clone()).await, 1);

        let result = tokio::time::timeout(Duration::from_millis(100), pool.checkout()).await;
        assert!(result.is_err());

        for _ in 0..50 {
            if driver.deleted.load(Ordering::SeqCst) == 1 && pool.available() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(driver.created.load(Ordering::SeqCst), 1);
        assert_eq!(driver.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), pool.max_sessions());
    }

    #[tokio::test]
    async fn test_checkout_waits_for_free_slot() {
        let driver = MockDriver::default();
        let pool = Arc::new(pool(spawn_mock_driver(driver.clone()).await, 1));

        let first = pool.checkout().await.unwrap();
        let waiting = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.checkout().await.map(|s| s.id().to_string()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        assert_eq!(driver.created.load(Ordering::SeqCst), 1);

        first.release().await.unwrap();
        let second = waiting.await.unwrap().unwrap();
        assert_eq!(second, "s1");
    }

    #[tokio::test]
    async fn test_ready_reports_driver_status() {
        let pool_ok = pool(spawn_mock_driver(MockDriver::default()).await, 1);
        assert!(pool_ok.ready().await);

        // Puerto cerrado
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let pool_down = pool(Url::parse(&format!("http://{}", addr)).unwrap(), 1);
        assert!(!pool_down.ready().await);

        let err = pool_down.checkout().await.err().unwrap();
        assert!(matches!(err, ExtractionError::DriverUnavailable(_)));
    }
}
