//! HTTP handlers for the issuance service

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use acg_common::{CertificateId, Origin, TemplateId};

use crate::download;
use crate::models::{
    AttemptsResponse, CertificateView, CertificatesResponse, IncomingResponse,
    IssueCertificateRequest, IssueCertificateResponse, PutWebhookConfigRequest, StatusResponse,
    SuccessResponse, WebhookConfigView,
};
use crate::notifier;
use crate::pipeline::IntakeRequest;
use crate::AppState;

/// Header carrying the caller's API key on inbound webhook calls
pub const API_KEY_HEADER: &str = "X-ACG-API-Key";

/// Header carrying the HMAC signature of the request body
pub const SIGNATURE_HEADER: &str = "X-ACG-Signature";

/// Default number of attempt rows returned by the audit listing
const DEFAULT_ATTEMPT_LIMIT: usize = 50;

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<acg_common::Error> for ApiError {
    fn from(err: acg_common::Error) -> Self {
        ApiError {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

/// Query parameters of the attempt listing
#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    /// Maximum rows to return
    pub limit: Option<usize>,
}

/// Query parameters of the PDF download
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Download token issued alongside the certificate
    pub token: Option<String>,
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "issuance-service"
    }))
}

/// Service status summary
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let certificates_issued = state.storage.count_issuances().await?;
    Ok(Json(StatusResponse {
        service: "issuance-service".to_string(),
        storage: state.config.storage_backend.as_str().to_string(),
        certificates_issued,
    }))
}

/// Create or replace a template's webhook configuration
pub async fn put_webhook_config_handler(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<u64>,
    Json(payload): Json<PutWebhookConfigRequest>,
) -> Result<Json<WebhookConfigView>, ApiError> {
    if payload.api_key.trim().is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "api_key must not be empty".to_string(),
        });
    }

    let template_id = TemplateId::new(template_id);
    let config = payload.into_config();
    state.storage.put_webhook_config(template_id, &config).await?;
    info!("Stored webhook config for template {}", template_id);

    Ok(Json(WebhookConfigView::redacted(&config)))
}

/// Fetch a template's webhook configuration, secrets redacted
pub async fn get_webhook_config_handler(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<u64>,
) -> Result<Json<WebhookConfigView>, ApiError> {
    let template_id = TemplateId::new(template_id);
    match state.storage.get_webhook_config(template_id).await? {
        Some(config) => Ok(Json(WebhookConfigView::redacted(&config))),
        None => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("No webhook config for template {}", template_id),
        }),
    }
}

/// Remove a template's webhook configuration
pub async fn delete_webhook_config_handler(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<u64>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let template_id = TemplateId::new(template_id);
    let deleted = state.storage.delete_webhook_config(template_id).await?;

    if deleted {
        info!("Deleted webhook config for template {}", template_id);
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("No webhook config for template {}", template_id),
        })
    }
}

/// Inbound webhook endpoint: authenticate, normalize and issue
pub async fn incoming_webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IncomingResponse>), ApiError> {
    let request = IntakeRequest {
        template_id: TemplateId::new(template_id),
        api_key: header_str(&headers, API_KEY_HEADER),
        signature: header_str(&headers, SIGNATURE_HEADER),
        body: &body,
        route: format!("/templates/{template_id}/incoming"),
        ip: client_ip(&headers),
    };

    let outcome = state.pipeline.handle(request).await?;
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(outcome.response)))
}

/// Issue a certificate directly, bypassing webhook auth and rate limits.
/// Meant for operators acting through the admin API.
pub async fn issue_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<u64>,
    Json(payload): Json<IssueCertificateRequest>,
) -> Result<Json<IssueCertificateResponse>, ApiError> {
    let template_id = TemplateId::new(template_id);
    info!("Manual issuance requested for template {}", template_id);

    let issued = state
        .issuer
        .issue(template_id, payload.variables, Origin::Manual, payload.user_id)
        .await?;

    if let Some(config) = state.storage.get_webhook_config(template_id).await? {
        notifier::enqueue_if_configured(
            state.storage.as_ref(),
            &config,
            &issued.certificate_id,
            template_id,
            state.clock.now(),
        )
        .await;
    }

    Ok(Json(IssueCertificateResponse {
        success: true,
        certificate_id: issued.certificate_id,
        download_url: issued.download_url,
    }))
}

/// Fetch one issuance record
pub async fn get_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
) -> Result<Json<CertificateView>, ApiError> {
    let certificate_id = CertificateId::new(certificate_id);
    match state.storage.get_issuance(&certificate_id).await? {
        Some(record) => Ok(Json(CertificateView::from(record))),
        None => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("Certificate not found: {}", certificate_id),
        }),
    }
}

/// List a template's certificates, newest first
pub async fn list_certificates_handler(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<u64>,
) -> Result<Json<CertificatesResponse>, ApiError> {
    let records = state
        .storage
        .issuances_for_template(TemplateId::new(template_id))
        .await?;
    Ok(Json(CertificatesResponse {
        certificates: records.into_iter().map(CertificateView::from).collect(),
    }))
}

/// List a template's webhook attempts, newest first
pub async fn list_attempts_handler(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<u64>,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<AttemptsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_ATTEMPT_LIMIT);
    let attempts = state
        .storage
        .attempts_for_template(TemplateId::new(template_id), limit)
        .await?;
    Ok(Json(AttemptsResponse { attempts }))
}

/// Download a certificate PDF. Requires the download token handed out at
/// issuance time.
pub async fn download_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let certificate_id = CertificateId::new(certificate_id);
    let record = download::verify_download(
        state.storage.as_ref(),
        &certificate_id,
        query.token.as_deref(),
    )
    .await?;

    let bytes = state.pdf_store.load(&record.pdf_path).await?;
    let content_disposition = format!("attachment; filename=\"{}.pdf\"", record.certificate_id);

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .body(Body::from(bytes))
        .unwrap())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Best-effort client address: first hop of X-Forwarded-For, then X-Real-IP
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    header_str(headers, "x-real-ip").map(|ip| ip.trim().to_string())
}
