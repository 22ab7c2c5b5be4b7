//! Durable rows produced by the issuance pipeline: issuance records
//! (one per generated certificate) and attempt records (one per webhook call).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CertificateId, DownloadToken, TemplateId};

/// How a certificate came to be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Issued by an operator through the admin API
    Manual,
    /// Issued by an inbound webhook call
    Webhook,
    /// Issued as part of a bulk import
    Bulk,
}

/// Direction of a webhook call seen by the attempt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// A call received by this service
    Incoming,
    /// A notification this service sent out
    Outgoing,
}

/// Outbound notification state of an issuance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// Notification not yet delivered
    Pending,
    /// Delivered with a 2xx response
    Sent,
    /// Delivery attempts exhausted
    Failed,
}

/// Email delivery state, owned by the external mailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    /// No email sent yet
    Pending,
    /// Email delivered
    Sent,
    /// Email delivery failed
    Failed,
}

/// The durable result of one successful certificate generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceRecord {
    /// Globally unique certificate identifier
    pub certificate_id: CertificateId,

    /// Template the certificate was rendered from
    pub template_id: TemplateId,

    /// Issuance origin
    pub generated_by: Origin,

    /// Acting user for manual issuance, absent for webhook calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,

    /// Placeholder name to value, in the order received
    pub variables: serde_json::Map<String, serde_json::Value>,

    /// Location of the rendered PDF, owned by the file store
    pub pdf_path: String,

    /// Secret required alongside the certificate ID to download the PDF
    pub download_token: DownloadToken,

    /// When the certificate was issued
    pub created_at: DateTime<Utc>,

    /// Email delivery state
    pub email_status: EmailStatus,

    /// Outbound notification state
    pub webhook_status: WebhookStatus,
}

impl IssuanceRecord {
    /// Create a record for a just-rendered certificate. Status fields start
    /// at their pending defaults regardless of origin.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        certificate_id: CertificateId,
        template_id: TemplateId,
        generated_by: Origin,
        user_id: Option<u64>,
        variables: serde_json::Map<String, serde_json::Value>,
        pdf_path: String,
        download_token: DownloadToken,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            certificate_id,
            template_id,
            generated_by,
            user_id,
            variables,
            pdf_path,
            download_token,
            created_at,
            email_status: EmailStatus::Pending,
            webhook_status: WebhookStatus::Pending,
        }
    }

    /// Record a successful outbound notification
    pub fn mark_webhook_sent(&mut self) {
        self.webhook_status = WebhookStatus::Sent;
    }

    /// Record exhausted notification attempts
    pub fn mark_webhook_failed(&mut self) {
        self.webhook_status = WebhookStatus::Failed;
    }
}

/// Audit entry for one webhook call, inbound or outbound.
/// Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Storage-assigned sequence number (0 until appended)
    pub id: u64,

    /// Call direction
    pub direction: Direction,

    /// Template the call concerned
    pub template_id: TemplateId,

    /// Certificate tied to the call, when one exists. For inbound batches
    /// this is the first certificate the batch issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<CertificateId>,

    /// Route the call hit, or the URL we delivered to
    pub url: String,

    /// Raw payload as received or as sent
    pub payload_json: String,

    /// HTTP status of the response (0 when the connection failed)
    pub response_code: u16,

    /// Whether the call achieved its purpose
    pub success: bool,

    /// Failure detail, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Always 1 for inbound calls; retry index for outbound deliveries
    pub attempt_number: u32,

    /// When the attempt happened
    pub created_at: DateTime<Utc>,

    /// Caller address for inbound calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl AttemptRecord {
    /// Build an inbound attempt row. The storage layer assigns `id` on append.
    #[allow(clippy::too_many_arguments)]
    pub fn incoming(
        template_id: TemplateId,
        certificate_id: Option<CertificateId>,
        url: String,
        payload_json: String,
        response_code: u16,
        success: bool,
        error_message: Option<String>,
        ip_address: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            direction: Direction::Incoming,
            template_id,
            certificate_id,
            url,
            payload_json,
            response_code,
            success,
            error_message,
            attempt_number: 1,
            created_at,
            ip_address,
        }
    }

    /// Build an outbound attempt row for one delivery try.
    #[allow(clippy::too_many_arguments)]
    pub fn outgoing(
        template_id: TemplateId,
        certificate_id: CertificateId,
        url: String,
        payload_json: String,
        response_code: u16,
        success: bool,
        error_message: Option<String>,
        attempt_number: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            direction: Direction::Outgoing,
            template_id,
            certificate_id: Some(certificate_id),
            url,
            payload_json,
            response_code,
            success,
            error_message,
            attempt_number,
            created_at,
            ip_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_variables() -> serde_json::Map<String, serde_json::Value> {
        let mut vars = serde_json::Map::new();
        vars.insert("name".into(), serde_json::json!("Ada Lovelace"));
        vars.insert("course".into(), serde_json::json!("Mathematics"));
        vars
    }

    #[test]
    fn test_new_record_starts_pending() {
        let record = IssuanceRecord::new(
            CertificateId::new("CERT-AB12"),
            TemplateId::new(7),
            Origin::Webhook,
            None,
            sample_variables(),
            "out/cert.pdf".into(),
            DownloadToken::generate(),
            Utc::now(),
        );
        assert_eq!(record.webhook_status, WebhookStatus::Pending);
        assert_eq!(record.email_status, EmailStatus::Pending);
    }

    #[test]
    fn test_webhook_status_transitions() {
        let mut record = IssuanceRecord::new(
            CertificateId::new("CERT-AB12"),
            TemplateId::new(7),
            Origin::Manual,
            Some(3),
            sample_variables(),
            "out/cert.pdf".into(),
            DownloadToken::generate(),
            Utc::now(),
        );
        record.mark_webhook_sent();
        assert_eq!(record.webhook_status, WebhookStatus::Sent);
        record.mark_webhook_failed();
        assert_eq!(record.webhook_status, WebhookStatus::Failed);
    }

    #[test]
    fn test_variables_preserve_insertion_order() {
        let record = IssuanceRecord::new(
            CertificateId::new("CERT-AB12"),
            TemplateId::new(7),
            Origin::Webhook,
            None,
            sample_variables(),
            "out/cert.pdf".into(),
            DownloadToken::generate(),
            Utc::now(),
        );
        let keys: Vec<&String> = record.variables.keys().collect();
        assert_eq!(keys, vec!["name", "course"]);
    }

    #[test]
    fn test_origin_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Origin::Webhook).unwrap(), "\"webhook\"");
        assert_eq!(serde_json::to_string(&Direction::Incoming).unwrap(), "\"incoming\"");
        assert_eq!(
            serde_json::to_string(&WebhookStatus::Pending).unwrap(),
            "\"pending\""
        );
    }

    #[test]
    fn test_incoming_attempt_defaults() {
        let attempt = AttemptRecord::incoming(
            TemplateId::new(7),
            None,
            "/templates/7/incoming".into(),
            "{}".into(),
            401,
            false,
            Some("Invalid API key".into()),
            Some("203.0.113.9".into()),
            Utc::now(),
        );
        assert_eq!(attempt.direction, Direction::Incoming);
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.id, 0);
    }
}
