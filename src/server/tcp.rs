//! # Servidor HTTP
//! src/server/tcp.rs
//!
//! Arma los componentes del servicio (store, scheduler, materializador,
//! adaptador de extracción) y los sirve sobre un `TcpListener` de tokio.
//! Al recibir Ctrl-C / SIGTERM deja de aceptar requests y detiene el
//! scheduler, que cancela las extracciones en curso.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::error::ServerError;
use crate::extraction::{ExtractionAdapter, WebDriverAdapter, WebDriverSettings};
use crate::jobs::{JobQueries, JobScheduler, JobStore, ResultMaterializer, SchedulerConfig};
use crate::metrics::MetricsCollector;
use crate::router::{create_router, AppState};

pub struct Server {
    config: Config,
    state: AppState,
    materializer: Arc<ResultMaterializer>,
}

impl Server {
    /// Crea el servidor con el adaptador WebDriver configurado
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config.validate()?;
        let settings = WebDriverSettings::from_config(&config)?;
        let adapter = Arc::new(WebDriverAdapter::new(settings)?);
        Ok(Self::with_adapter(config, adapter))
    }

    /// Crea el servidor con un adaptador de extracción arbitrario.
    ///
    /// Los workers no arrancan hasta [`Server::serve`] o hasta llamar
    /// `start()` sobre el scheduler.
    pub fn with_adapter(config: Config, adapter: Arc<dyn ExtractionAdapter>) -> Self {
        let store = Arc::new(JobStore::new());
        let materializer = Arc::new(ResultMaterializer::new(PathBuf::from(&config.output_dir)));
        let metrics = MetricsCollector::new();

        let scheduler = JobScheduler::new(
            SchedulerConfig::from_config(&config),
            Arc::clone(&store),
            Arc::clone(&adapter),
            Arc::clone(&materializer),
            metrics.clone(),
        );
        let queries = JobQueries::new(store, Arc::clone(&materializer), adapter);

        let state = AppState {
            scheduler,
            queries,
            metrics,
            retry_after_secs: config.retry_after_secs,
        };

        Self {
            config,
            state,
            materializer,
        }
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.state.scheduler
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Escucha en `host:port` hasta recibir Ctrl-C o SIGTERM
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.address()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Sirve sobre un listener ya abierto hasta que `signal` se complete
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.materializer.prepare().await?;
        self.state.scheduler.start();

        info!(
            address = %listener.local_addr()?,
            output_dir = %self.materializer.output_dir().display(),
            "server listening"
        );

        // El scheduler se detiene antes de que axum espere a los requests
        // abiertos: un `/scrape` síncrono recibe su job Cancelled en vez de
        // bloquear el apagado hasta que termine la extracción.
        let scheduler = self.state.scheduler.clone();
        let stop = async move {
            signal.await;
            scheduler.shutdown().await;
        };

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(stop)
            .await;

        self.state.scheduler.shutdown().await;
        served?;

        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
