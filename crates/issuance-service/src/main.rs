//! Issuance Service
//!
//! REST API for webhook-driven certificate issuance + background worker
//! for outbound notifications

use acg_common::SystemClock;
use anyhow::{Context, Result};
use issuance_service::config::StorageBackend;
use issuance_service::{
    create_router, AppState, CertificateRenderer, Config, FilePdfStore, HttpRenderer,
    MemoryStorage, Notifier, RedisStorage, Storage, StubRenderer,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "issuance_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .ensure_directories()
        .context("Failed to create output directories")?;

    info!("Starting Issuance Service");
    info!("Storage backend: {}", config.storage_backend.as_str());
    info!("Public base URL: {}", config.public_base_url);

    let storage: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::Redis => Arc::new(
            RedisStorage::new(&config.redis_url)
                .await
                .context("Failed to initialize Redis storage")?,
        ),
        StorageBackend::Memory => {
            warn!("Using in-memory storage; nothing survives a restart");
            Arc::new(MemoryStorage::new())
        }
    };

    let renderer: Arc<dyn CertificateRenderer> = match &config.renderer_url {
        Some(url) => {
            info!("Rendering via external service at {}", url);
            Arc::new(HttpRenderer::new(url.clone()))
        }
        None => {
            info!("No renderer configured, using the built-in stub");
            Arc::new(StubRenderer)
        }
    };

    let pdf_store = Arc::new(FilePdfStore::new(config.pdf_dir.clone()));
    let clock = Arc::new(SystemClock);

    let addr = config.api_address();
    let state = AppState::new(
        config,
        storage.clone(),
        renderer,
        pdf_store,
        clock.clone(),
    );

    // Spawn the outbound notification worker
    let notifier = Notifier::new(storage, state.config.as_ref(), clock);
    let worker_handle = tokio::spawn(notifier.run());

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Issuance Service API running on http://{}", addr);
    info!("Notification worker started");

    axum::serve(listener, app).await.context("Server error")?;

    // Unreachable in normal operation
    worker_handle.await?;

    Ok(())
}
