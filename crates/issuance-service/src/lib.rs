//! Certificate Issuance Service
//!
//! Receives webhook calls from external systems, authenticates them per
//! template, renders certificates to PDF and hands back tokenized download
//! links. An admin API manages per-template webhook configuration, and an
//! outbound worker notifies interested systems of every issuance.
//!
//! ## Endpoints
//!
//! - `POST /templates/{template_id}/incoming` - Inbound webhook intake
//! - `PUT /api/templates/{template_id}/webhook` - Configure a template's webhook
//! - `GET /api/templates/{template_id}/webhook` - Inspect config (secrets redacted)
//! - `DELETE /api/templates/{template_id}/webhook` - Remove config
//! - `POST /api/templates/{template_id}/certificates` - Manual issuance
//! - `GET /api/templates/{template_id}/certificates` - List issuances
//! - `GET /api/templates/{template_id}/attempts` - Webhook audit log
//! - `GET /api/certificates/{certificate_id}` - One issuance record
//! - `GET /certificates/{certificate_id}/download` - Tokenized PDF download
//! - `GET /api/status` - Service status
//! - `GET /health` - Health check

pub mod attempt_log;
pub mod config;
pub mod download;
pub mod handlers;
pub mod issuer;
pub mod models;
pub mod normalize;
pub mod notifier;
pub mod pdf;
pub mod pipeline;
pub mod rate_limit;
pub mod render;
pub mod storage;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::Config;
pub use issuer::CertificateIssuer;
pub use notifier::Notifier;
pub use pdf::{FilePdfStore, MemoryPdfStore, PdfStore};
pub use render::{CertificateRenderer, HttpRenderer, StubRenderer};
pub use storage::{MemoryStorage, RedisStorage, Storage};

use acg_common::Clock;
use attempt_log::AttemptLogger;
use issuer::IssuerSettings;
use pipeline::IntakePipeline;
use rate_limit::RateLimiter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Service configuration
    pub config: Arc<Config>,

    /// Persistence for configs, issuances, attempts and counters
    pub storage: Arc<dyn Storage>,

    /// Rendered PDF bytes
    pub pdf_store: Arc<dyn PdfStore>,

    /// Time source, swappable in tests
    pub clock: Arc<dyn Clock>,

    /// Certificate issuance engine
    pub issuer: CertificateIssuer,

    /// Inbound webhook pipeline
    pub pipeline: IntakePipeline,
}

impl AppState {
    /// Wire the processing stack over the given backends
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        renderer: Arc<dyn CertificateRenderer>,
        pdf_store: Arc<dyn PdfStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = CertificateIssuer::new(
            storage.clone(),
            renderer,
            pdf_store.clone(),
            clock.clone(),
            IssuerSettings::from(&config),
        );
        let pipeline = IntakePipeline::new(
            storage.clone(),
            issuer.clone(),
            RateLimiter::new(storage.clone()),
            AttemptLogger::new(storage.clone()),
            clock.clone(),
            config.rate_limit_per_minute,
        );

        Self {
            config: Arc::new(config),
            storage,
            pdf_store,
            clock,
            issuer,
            pipeline,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Health and status
        .route("/health", get(handlers::health_handler))
        .route("/api/status", get(handlers::status_handler))
        // Inbound webhook intake
        .route(
            "/templates/{template_id}/incoming",
            post(handlers::incoming_webhook_handler),
        )
        // Webhook configuration
        .route(
            "/api/templates/{template_id}/webhook",
            put(handlers::put_webhook_config_handler)
                .get(handlers::get_webhook_config_handler)
                .delete(handlers::delete_webhook_config_handler),
        )
        // Issuance and audit
        .route(
            "/api/templates/{template_id}/certificates",
            post(handlers::issue_certificate_handler).get(handlers::list_certificates_handler),
        )
        .route(
            "/api/templates/{template_id}/attempts",
            get(handlers::list_attempts_handler),
        )
        .route(
            "/api/certificates/{certificate_id}",
            get(handlers::get_certificate_handler),
        )
        // Tokenized download
        .route(
            "/certificates/{certificate_id}/download",
            get(handlers::download_certificate_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
