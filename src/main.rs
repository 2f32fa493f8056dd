mod config;
mod drafts;
mod error;
mod gemini;
mod models;
mod orchestrator;
mod routes;
mod search;
mod session;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::drafts::{DraftStore, FileBlobStore};
use crate::gemini::{preview, GeminiClient, DEMO_KEY};
use crate::orchestrator::Orchestrator;
use crate::routes::{router, AppState};
use crate::search::EsliteSearchClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    if config.gemini.api_key == DEMO_KEY {
        tracing::warn!("GEMINI_API_KEY not set, running in demo mode");
    } else {
        tracing::info!("Using API key: {}", preview(&config.gemini.api_key, 6));
    }
    tracing::info!("Workflow mode: {:?}", config.workflow_mode);

    let gemini = Arc::new(GeminiClient::new(&config.gemini));
    let catalogue = Arc::new(EsliteSearchClient::new(config.search.clone()));
    let drafts = Arc::new(DraftStore::open(Arc::new(FileBlobStore::new(&config.drafts_dir))));
    let orchestrator = Arc::new(Orchestrator::new(gemini, catalogue.clone(), config.workflow_mode));
    let app = router(AppState::new(orchestrator, drafts, catalogue));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
