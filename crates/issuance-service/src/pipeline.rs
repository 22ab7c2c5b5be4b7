//! Inbound webhook intake
//!
//! One call runs the gauntlet in a fixed order: webhook configuration,
//! authentication, rate limiting, payload normalization, then per-item
//! issuance. Every outcome past the configuration check leaves exactly one
//! attempt row; calls for unconfigured templates are turned away without
//! being recorded at all.

use std::sync::Arc;

use acg_common::signature::verify_request;
use acg_common::{
    AttemptRecord, CertificateId, Clock, Error, Origin, Result, TemplateId, TemplateWebhookConfig,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::attempt_log::AttemptLogger;
use crate::issuer::{CertificateIssuer, IssuedCertificate};
use crate::models::{IncomingResponse, ItemResult};
use crate::normalize;
use crate::notifier;
use crate::rate_limit::RateLimiter;
use crate::storage::Storage;

/// One inbound webhook call, as extracted from the HTTP layer
pub struct IntakeRequest<'a> {
    pub template_id: TemplateId,
    pub api_key: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
    pub route: String,
    pub ip: Option<String>,
}

/// What the caller gets back: 200 when every item issued, 207 otherwise
pub struct IntakeOutcome {
    pub status: u16,
    pub response: IncomingResponse,
}

#[derive(Clone)]
pub struct IntakePipeline {
    storage: Arc<dyn Storage>,
    issuer: CertificateIssuer,
    limiter: RateLimiter,
    attempts: AttemptLogger,
    clock: Arc<dyn Clock>,
    default_rate_limit: u32,
}

impl IntakePipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        issuer: CertificateIssuer,
        limiter: RateLimiter,
        attempts: AttemptLogger,
        clock: Arc<dyn Clock>,
        default_rate_limit: u32,
    ) -> Self {
        Self {
            storage,
            issuer,
            limiter,
            attempts,
            clock,
            default_rate_limit,
        }
    }

    /// Process one inbound webhook call end to end.
    pub async fn handle(&self, request: IntakeRequest<'_>) -> Result<IntakeOutcome> {
        // A template nobody configured gets a plain refusal and no attempt
        // row; only configured endpoints are worth auditing.
        let config = match self.storage.get_webhook_config(request.template_id).await {
            Ok(Some(config)) if config.is_configured() => config,
            Ok(_) => {
                debug!(
                    "Webhook call for unconfigured template {}",
                    request.template_id
                );
                return Err(Error::Unconfigured);
            }
            Err(e) => {
                self.log_failure(&request, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = verify_request(
            Some(&config),
            request.api_key,
            request.signature,
            request.body,
        ) {
            self.log_failure(&request, &e).await;
            return Err(e);
        }

        let limit = config.effective_rate_limit(self.default_rate_limit);
        let ip = request.ip.as_deref().unwrap_or("unknown");
        if let Err(e) = self
            .limiter
            .check_and_increment(request.template_id, ip, limit)
            .await
        {
            self.log_failure(&request, &e).await;
            return Err(e);
        }

        let batch = match normalize::resolve(request.body) {
            Ok(batch) => batch,
            Err(e) => {
                self.log_failure(&request, &e).await;
                return Err(e);
            }
        };

        let mut results = Vec::with_capacity(batch.items.len());
        let mut first_certificate: Option<CertificateId> = None;
        for (index, item) in batch.items.into_iter().enumerate() {
            match self.issue_item(request.template_id, item, &config).await {
                Ok(issued) => {
                    if first_certificate.is_none() {
                        first_certificate = Some(issued.certificate_id.clone());
                    }
                    results.push(ItemResult::succeeded(
                        index,
                        issued.certificate_id,
                        issued.download_url,
                    ));
                }
                Err(e) => {
                    warn!(
                        "Item {} failed for template {}: {}",
                        index, request.template_id, e
                    );
                    results.push(ItemResult::failed(index, e.to_string()));
                }
            }
        }

        let all_ok = results.iter().all(|r| r.success);
        let status = if all_ok { 200 } else { 207 };

        let failures = results.iter().filter(|r| !r.success).count();
        let error_message =
            (failures > 0).then(|| format!("{failures} of {} items failed", results.len()));
        self.attempts
            .record(AttemptRecord::incoming(
                request.template_id,
                first_certificate,
                request.route.clone(),
                String::from_utf8_lossy(request.body).into_owned(),
                status,
                all_ok,
                error_message,
                request.ip.clone(),
                self.clock.now(),
            ))
            .await;

        Ok(IntakeOutcome {
            status,
            response: IncomingResponse {
                success: all_ok,
                results,
            },
        })
    }

    /// Issue a certificate for one normalized batch item.
    async fn issue_item(
        &self,
        template_id: TemplateId,
        item: Value,
        config: &TemplateWebhookConfig,
    ) -> Result<IssuedCertificate> {
        let variables = match item {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidPayload(format!(
                    "item must be a JSON object, got {other}"
                )))
            }
        };

        let issued = self
            .issuer
            .issue(template_id, variables, Origin::Webhook, None)
            .await?;
        notifier::enqueue_if_configured(
            self.storage.as_ref(),
            config,
            &issued.certificate_id,
            template_id,
            self.clock.now(),
        )
        .await;
        Ok(issued)
    }

    /// Record a refused call. The attempt row carries the same status code
    /// and message the caller receives.
    async fn log_failure(&self, request: &IntakeRequest<'_>, error: &Error) {
        self.attempts
            .record(AttemptRecord::incoming(
                request.template_id,
                None,
                request.route.clone(),
                String::from_utf8_lossy(request.body).into_owned(),
                error.status_code(),
                false,
                Some(error.to_string()),
                request.ip.clone(),
                self.clock.now(),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdStyle;
    use crate::issuer::IssuerSettings;
    use crate::pdf::MemoryPdfStore;
    use crate::render::StubRenderer;
    use crate::storage::MemoryStorage;
    use acg_common::signature::compute_signature;
    use acg_common::FixedClock;
    use chrono::{TimeZone, Utc};

    struct Harness {
        storage: Arc<MemoryStorage>,
        pipeline: IntakePipeline,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
        let issuer = CertificateIssuer::new(
            storage.clone(),
            Arc::new(StubRenderer),
            Arc::new(MemoryPdfStore::new()),
            clock.clone(),
            IssuerSettings {
                prefix: "CERT-".to_string(),
                id_style: IdStyle::Random,
                suffix_len: 8,
                public_base_url: "http://localhost:8090".to_string(),
            },
        );
        let pipeline = IntakePipeline::new(
            storage.clone(),
            issuer,
            RateLimiter::new(storage.clone()),
            AttemptLogger::new(storage.clone()),
            clock,
            60,
        );
        Harness { storage, pipeline }
    }

    async fn configure(harness: &Harness, template_id: u64, config: TemplateWebhookConfig) {
        harness
            .storage
            .put_webhook_config(TemplateId::new(template_id), &config)
            .await
            .unwrap();
    }

    fn request<'a>(
        template_id: u64,
        api_key: Option<&'a str>,
        body: &'a [u8],
    ) -> IntakeRequest<'a> {
        IntakeRequest {
            template_id: TemplateId::new(template_id),
            api_key,
            signature: None,
            body,
            route: format!("/templates/{template_id}/incoming"),
            ip: Some("203.0.113.9".to_string()),
        }
    }

    async fn attempt_rows(harness: &Harness, template_id: u64) -> Vec<AttemptRecord> {
        harness
            .storage
            .attempts_for_template(TemplateId::new(template_id), 50)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unconfigured_template_is_refused_without_a_trace() {
        let harness = harness();
        let result = harness
            .pipeline
            .handle(request(1, Some("key"), br#"{"name": "Ada"}"#))
            .await;
        assert!(matches!(result, Err(Error::Unconfigured)));
        assert!(attempt_rows(&harness, 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_config_with_empty_key_counts_as_unconfigured() {
        let harness = harness();
        configure(&harness, 1, TemplateWebhookConfig::new("")).await;
        let result = harness
            .pipeline
            .handle(request(1, Some("key"), br#"{"name": "Ada"}"#))
            .await;
        assert!(matches!(result, Err(Error::Unconfigured)));
        assert!(attempt_rows(&harness, 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_api_key_is_refused_and_logged() {
        let harness = harness();
        configure(&harness, 1, TemplateWebhookConfig::new("correct")).await;

        let result = harness
            .pipeline
            .handle(request(1, Some("wrong"), br#"{"name": "Ada"}"#))
            .await;
        assert!(matches!(result, Err(Error::AuthFailed)));

        let rows = attempt_rows(&harness, 1).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].response_code, 401);
        assert!(!rows[0].success);
        assert!(rows[0].certificate_id.is_none());
        assert_eq!(rows[0].ip_address.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_single_object_issues_one_certificate() {
        let harness = harness();
        configure(&harness, 1, TemplateWebhookConfig::new("key")).await;

        let outcome = harness
            .pipeline
            .handle(request(1, Some("key"), br#"{"name": "Ada"}"#))
            .await
            .unwrap();

        assert_eq!(outcome.status, 200);
        assert!(outcome.response.success);
        assert_eq!(outcome.response.results.len(), 1);
        let result = &outcome.response.results[0];
        assert!(result.success);
        let id = result.certificate_id.as_ref().unwrap();
        assert!(id.as_str().starts_with("CERT-"));

        let rows = attempt_rows(&harness, 1).await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
        assert_eq!(rows[0].response_code, 200);
        assert_eq!(rows[0].certificate_id.as_ref(), Some(id));
        assert_eq!(rows[0].payload_json, r#"{"name": "Ada"}"#);
    }

    #[tokio::test]
    async fn test_mixed_batch_reports_207_in_input_order() {
        let harness = harness();
        configure(&harness, 1, TemplateWebhookConfig::new("key")).await;

        let outcome = harness
            .pipeline
            .handle(request(
                1,
                Some("key"),
                br#"{"items": [{"name": "Ada"}, 17, {"name": "Grace"}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(outcome.status, 207);
        assert!(!outcome.response.success);
        let results = &outcome.response.results;
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
        assert_eq!(results[1].index, 1);

        let rows = attempt_rows(&harness, 1).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].response_code, 207);
        assert_eq!(rows[0].error_message.as_deref(), Some("1 of 3 items failed"));
        // The row points at the first certificate the batch produced
        assert_eq!(
            rows[0].certificate_id.as_ref(),
            results[0].certificate_id.as_ref()
        );
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds_with_no_results() {
        let harness = harness();
        configure(&harness, 1, TemplateWebhookConfig::new("key")).await;

        let outcome = harness
            .pipeline
            .handle(request(1, Some("key"), b"{}"))
            .await
            .unwrap();
        assert_eq!(outcome.status, 200);
        assert!(outcome.response.results.is_empty());

        let rows = attempt_rows(&harness, 1).await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
        assert!(rows[0].certificate_id.is_none());
    }

    #[tokio::test]
    async fn test_signature_is_required_when_secret_is_set() {
        let harness = harness();
        let mut config = TemplateWebhookConfig::new("key");
        config.signature_secret = Some("secret".to_string());
        configure(&harness, 1, config).await;

        let body = br#"{"name": "Ada"}"#;
        let result = harness.pipeline.handle(request(1, Some("key"), body)).await;
        assert!(matches!(result, Err(Error::SignatureFailed)));
        assert_eq!(attempt_rows(&harness, 1).await[0].response_code, 401);

        let signature = compute_signature("secret", body);
        let outcome = harness
            .pipeline
            .handle(IntakeRequest {
                signature: Some(&signature),
                ..request(1, Some("key"), body)
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, 200);
    }

    #[tokio::test]
    async fn test_rate_limit_override_applies() {
        let harness = harness();
        let mut config = TemplateWebhookConfig::new("key");
        config.rate_limit = Some(2);
        configure(&harness, 1, config).await;

        for _ in 0..2 {
            harness
                .pipeline
                .handle(request(1, Some("key"), br#"{"name": "Ada"}"#))
                .await
                .unwrap();
        }
        let result = harness
            .pipeline
            .handle(request(1, Some("key"), br#"{"name": "Ada"}"#))
            .await;
        assert!(matches!(result, Err(Error::RateLimited)));

        let rows = attempt_rows(&harness, 1).await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].response_code, 429);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_and_logged() {
        let harness = harness();
        configure(&harness, 1, TemplateWebhookConfig::new("key")).await;

        let result = harness
            .pipeline
            .handle(request(1, Some("key"), b"certainly not a payload"))
            .await;
        assert!(matches!(result, Err(Error::InvalidPayload(_))));

        let rows = attempt_rows(&harness, 1).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].response_code, 400);
    }

    #[tokio::test]
    async fn test_successful_items_enqueue_notifications() {
        let harness = harness();
        let mut config = TemplateWebhookConfig::new("key");
        config.notify_url = Some("https://example.com/hook".to_string());
        configure(&harness, 1, config).await;

        harness
            .pipeline
            .handle(request(
                1,
                Some("key"),
                br#"[{"name": "Ada"}, {"name": "Grace"}]"#,
            ))
            .await
            .unwrap();

        let first = harness.storage.pop_notification().await.unwrap();
        let second = harness.storage.pop_notification().await.unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(harness.storage.pop_notification().await.unwrap().is_none());
    }
}
