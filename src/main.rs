//! # Maps Review Scraper - Entry Point
//! src/main.rs
//!
//! Punto de entrada del servicio: inicializa logging, lee la configuración
//! (CLI + variables de entorno) y levanta el servidor.

use clap::Parser;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use maps_review_scraper::config::Config;
use maps_review_scraper::server::Server;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,maps_review_scraper=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::parse();
    config.log_summary();

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
