//! Wire types for the issuance service API and the notification queue

use acg_common::{
    CertificateId, EmailStatus, IssuanceRecord, Origin, TemplateId, TemplateWebhookConfig,
    WebhookStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to create or replace a template's webhook configuration
#[derive(Debug, Deserialize)]
pub struct PutWebhookConfigRequest {
    /// Shared API key callers must present
    pub api_key: String,

    /// Optional HMAC signing secret for inbound payloads
    #[serde(default)]
    pub signature_secret: Option<String>,

    /// Optional per-template rate limit override (0 = global default)
    #[serde(default)]
    pub rate_limit: Option<u32>,

    /// Optional outbound notification URL
    #[serde(default)]
    pub notify_url: Option<String>,

    /// Optional secret for signing outbound notifications
    #[serde(default)]
    pub notify_secret: Option<String>,
}

impl PutWebhookConfigRequest {
    pub fn into_config(self) -> TemplateWebhookConfig {
        TemplateWebhookConfig {
            api_key: self.api_key,
            signature_secret: self.signature_secret,
            rate_limit: self.rate_limit,
            notify_url: self.notify_url,
            notify_secret: self.notify_secret,
        }
    }
}

/// Redacted view of a stored webhook configuration. Secrets never leave
/// the service; the key is reduced to a recognition hint.
#[derive(Debug, Serialize)]
pub struct WebhookConfigView {
    /// Last characters of the API key, for recognition
    pub api_key_hint: String,

    /// Whether an inbound signing secret is set
    pub has_signature_secret: bool,

    /// Per-template rate limit override, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Outbound notification URL, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,

    /// Whether an outbound signing secret is set
    pub has_notify_secret: bool,
}

impl WebhookConfigView {
    pub fn redacted(config: &TemplateWebhookConfig) -> Self {
        Self {
            api_key_hint: api_key_hint(&config.api_key),
            has_signature_secret: config.signing_secret().is_some(),
            rate_limit: config.rate_limit,
            notify_url: config.notify_target().map(String::from),
            has_notify_secret: config.notify_signing_secret().is_some(),
        }
    }
}

fn api_key_hint(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

/// Generic success acknowledgement
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Outcome of one item within an inbound batch, in input order
#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    /// Position of the item in the normalized batch
    pub index: usize,

    /// Whether this item produced a certificate
    pub success: bool,

    /// Issued certificate ID on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<CertificateId>,

    /// Download link on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Failure detail on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemResult {
    pub fn succeeded(index: usize, certificate_id: CertificateId, download_url: String) -> Self {
        Self {
            index,
            success: true,
            certificate_id: Some(certificate_id),
            download_url: Some(download_url),
            error: None,
        }
    }

    pub fn failed(index: usize, error: String) -> Self {
        Self {
            index,
            success: false,
            certificate_id: None,
            download_url: None,
            error: Some(error),
        }
    }
}

/// Response to an inbound webhook call. `success` is true only when every
/// item in the batch was issued.
#[derive(Debug, Serialize)]
pub struct IncomingResponse {
    pub success: bool,
    pub results: Vec<ItemResult>,
}

/// Request to issue a single certificate through the admin API
#[derive(Debug, Deserialize)]
pub struct IssueCertificateRequest {
    /// Placeholder name to value
    pub variables: serde_json::Map<String, serde_json::Value>,

    /// Acting user, recorded on the issuance
    #[serde(default)]
    pub user_id: Option<u64>,
}

/// Response to a manual issuance
#[derive(Debug, Serialize)]
pub struct IssueCertificateResponse {
    pub success: bool,
    pub certificate_id: CertificateId,
    pub download_url: String,
}

/// Issuance record as exposed over the API. The download token is omitted;
/// it only ever appears inside a download URL handed to the issuing caller.
#[derive(Debug, Serialize)]
pub struct CertificateView {
    pub certificate_id: CertificateId,
    pub template_id: TemplateId,
    pub generated_by: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub pdf_path: String,
    pub created_at: DateTime<Utc>,
    pub email_status: EmailStatus,
    pub webhook_status: WebhookStatus,
}

impl From<IssuanceRecord> for CertificateView {
    fn from(record: IssuanceRecord) -> Self {
        Self {
            certificate_id: record.certificate_id,
            template_id: record.template_id,
            generated_by: record.generated_by,
            user_id: record.user_id,
            variables: record.variables,
            pdf_path: record.pdf_path,
            created_at: record.created_at,
            email_status: record.email_status,
            webhook_status: record.webhook_status,
        }
    }
}

/// List of certificates for a template
#[derive(Debug, Serialize)]
pub struct CertificatesResponse {
    pub certificates: Vec<CertificateView>,
}

/// List of attempt records for a template
#[derive(Debug, Serialize)]
pub struct AttemptsResponse {
    pub attempts: Vec<acg_common::AttemptRecord>,
}

/// Service status summary
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub storage: String,
    pub certificates_issued: usize,
}

/// A queued outbound notification, serialized onto the storage-backed queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub certificate_id: CertificateId,
    pub template_id: TemplateId,
    pub enqueued_at: DateTime<Utc>,
}

/// Body of an outbound `certificate.issued` notification
#[derive(Debug, Serialize)]
pub struct CertificateIssuedEvent {
    pub event: String,
    pub certificate_id: CertificateId,
    pub template_id: TemplateId,
    pub generated_by: Origin,
    pub download_url: String,
    pub issued_at: DateTime<Utc>,
}

impl CertificateIssuedEvent {
    pub fn new(record: &IssuanceRecord, download_url: String) -> Self {
        Self {
            event: "certificate.issued".to_string(),
            certificate_id: record.certificate_id.clone(),
            template_id: record.template_id,
            generated_by: record.generated_by,
            download_url,
            issued_at: record.created_at,
        }
    }
}
