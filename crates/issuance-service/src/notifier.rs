//! Outbound notification worker
//!
//! Successful issuances put a job on the notification queue; this worker
//! drains it and delivers a `certificate.issued` event to the template's
//! notify URL, retrying with growing delays. Every delivery try lands in
//! the attempt log, and the issuance record's webhook status follows the
//! final outcome.

use std::sync::Arc;

use acg_common::signature::compute_signature;
use acg_common::{
    AttemptRecord, CertificateId, Clock, Result, TemplateId, TemplateWebhookConfig, WebhookStatus,
};
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::issuer::download_url;
use crate::models::{CertificateIssuedEvent, NotificationJob};
use crate::storage::Storage;

/// Event name carried in the `X-ACG-Event` header and the payload
pub const EVENT_CERTIFICATE_ISSUED: &str = "certificate.issued";

/// Seconds to wait after the first, second and later failed tries
const RETRY_DELAYS: [u64; 3] = [1, 5, 25];

pub struct Notifier {
    storage: Arc<dyn Storage>,
    client: reqwest::Client,
    public_base_url: String,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(storage: Arc<dyn Storage>, config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            client: reqwest::Client::new(),
            public_base_url: config.public_base_url.clone(),
            max_attempts: config.notify_max_attempts,
            clock,
        }
    }

    /// Drain the notification queue forever.
    pub async fn run(self) {
        info!("Notification worker started, waiting for jobs...");

        loop {
            match self.storage.pop_notification().await {
                Ok(Some(job)) => {
                    if let Err(e) = self.process_job(&job).await {
                        error!(
                            "Notification delivery for {} failed: {}",
                            job.certificate_id, e
                        );
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!("Error popping notification job: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Deliver one queued notification, retrying until it lands or the
    /// attempt budget is spent.
    async fn process_job(&self, job: &NotificationJob) -> Result<()> {
        let record = match self.storage.get_issuance(&job.certificate_id).await? {
            Some(record) => record,
            None => {
                warn!(
                    "Queued notification for unknown certificate {}, dropping",
                    job.certificate_id
                );
                return Ok(());
            }
        };

        let config = match self.storage.get_webhook_config(job.template_id).await? {
            Some(config) => config,
            None => {
                debug!(
                    "Webhook config for template {} gone, dropping notification",
                    job.template_id
                );
                return Ok(());
            }
        };
        let url = match config.notify_target() {
            Some(url) => url,
            None => return Ok(()),
        };

        let link = download_url(
            &self.public_base_url,
            &record.certificate_id,
            &record.download_token,
        );
        let event = CertificateIssuedEvent::new(&record, link);
        let body = serde_json::to_string(&event)?;
        let signature = config
            .notify_signing_secret()
            .map(|secret| compute_signature(secret, body.as_bytes()));

        for attempt in 1..=self.max_attempts {
            let (code, delivery_error) = self.deliver(url, &body, signature.as_deref()).await;
            let delivered = (200..300).contains(&code);

            let row = AttemptRecord::outgoing(
                job.template_id,
                job.certificate_id.clone(),
                url.to_string(),
                body.clone(),
                code,
                delivered,
                delivery_error,
                attempt,
                self.clock.now(),
            );
            if let Err(e) = self.storage.append_attempt(&row).await {
                error!("Failed to record delivery attempt: {}", e);
            }

            if delivered {
                info!(
                    "Notification for {} delivered on attempt {}",
                    job.certificate_id, attempt
                );
                self.mark(&job.certificate_id, WebhookStatus::Sent).await;
                return Ok(());
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(tokio::time::Duration::from_secs(delay_for(attempt))).await;
            }
        }

        warn!(
            "Notification for {} failed after {} attempts",
            job.certificate_id, self.max_attempts
        );
        self.mark(&job.certificate_id, WebhookStatus::Failed).await;
        Ok(())
    }

    /// One HTTP delivery try. Transport failures report as status 0.
    async fn deliver(
        &self,
        url: &str,
        body: &str,
        signature: Option<&str>,
    ) -> (u16, Option<String>) {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header("X-ACG-Event", EVENT_CERTIFICATE_ISSUED);
        if let Some(signature) = signature {
            request = request.header("X-ACG-Signature", format!("sha256={signature}"));
        }

        match request.body(body.to_string()).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                if response.status().is_success() {
                    (code, None)
                } else {
                    (code, Some(format!("delivery returned {}", response.status())))
                }
            }
            Err(e) => (0, Some(e.to_string())),
        }
    }

    async fn mark(&self, certificate_id: &CertificateId, status: WebhookStatus) {
        if let Err(e) = self.storage.update_webhook_status(certificate_id, status).await {
            error!("Failed to update webhook status for {}: {}", certificate_id, e);
        }
    }
}

fn delay_for(attempt: u32) -> u64 {
    let index = (attempt as usize - 1).min(RETRY_DELAYS.len() - 1);
    RETRY_DELAYS[index]
}

/// Queue a notification for a fresh issuance when the template asks for one.
/// Queue trouble is logged and swallowed; it must not fail the issuance.
pub async fn enqueue_if_configured(
    storage: &dyn Storage,
    config: &TemplateWebhookConfig,
    certificate_id: &CertificateId,
    template_id: TemplateId,
    now: DateTime<Utc>,
) {
    if config.notify_target().is_none() {
        return;
    }
    let job = NotificationJob {
        certificate_id: certificate_id.clone(),
        template_id,
        enqueued_at: now,
    };
    if let Err(e) = storage.enqueue_notification(&job).await {
        error!("Failed to enqueue notification for {}: {}", certificate_id, e);
    }
}
