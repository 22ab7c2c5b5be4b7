//! Persistence behind the issuance pipeline.
//!
//! Everything the service remembers goes through the [`Storage`] trait:
//! webhook configurations, issuance records, attempt logs, rate-limit
//! counters and the outbound notification queue. Two backends exist, a
//! Redis one for deployments and an in-memory one for tests and local runs.

mod memory;
mod redis;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use acg_common::{
    AttemptRecord, CertificateId, IssuanceRecord, Result, TemplateId, TemplateWebhookConfig,
    WebhookStatus,
};
use async_trait::async_trait;

use crate::models::NotificationJob;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store or replace the webhook configuration for a template
    async fn put_webhook_config(
        &self,
        template_id: TemplateId,
        config: &TemplateWebhookConfig,
    ) -> Result<()>;

    /// Fetch the webhook configuration for a template
    async fn get_webhook_config(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<TemplateWebhookConfig>>;

    /// Remove the webhook configuration for a template. Returns false when
    /// there was nothing to remove.
    async fn delete_webhook_config(&self, template_id: TemplateId) -> Result<bool>;

    /// Insert an issuance record if and only if its certificate ID is unused.
    /// Returns false when the ID is already taken.
    async fn insert_issuance(&self, record: &IssuanceRecord) -> Result<bool>;

    /// Fetch an issuance record by certificate ID
    async fn get_issuance(&self, certificate_id: &CertificateId) -> Result<Option<IssuanceRecord>>;

    /// All issuances for a template, newest first
    async fn issuances_for_template(&self, template_id: TemplateId) -> Result<Vec<IssuanceRecord>>;

    /// Update the outbound notification status of an issuance
    async fn update_webhook_status(
        &self,
        certificate_id: &CertificateId,
        status: WebhookStatus,
    ) -> Result<()>;

    /// Total number of certificates issued
    async fn count_issuances(&self) -> Result<usize>;

    /// Next value of the sequential certificate counter
    async fn next_certificate_sequence(&self) -> Result<u64>;

    /// Append an attempt record, assigning its ID. Returns the assigned ID.
    async fn append_attempt(&self, attempt: &AttemptRecord) -> Result<u64>;

    /// Recent attempts for a template, newest first, capped at `limit`
    async fn attempts_for_template(
        &self,
        template_id: TemplateId,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>>;

    /// Current count in the rate-limit window for a template and client
    async fn rate_count(&self, template_id: TemplateId, ip_hash: &str) -> Result<u32>;

    /// Count one request against the rate-limit window, starting the window
    /// on first use
    async fn rate_increment(
        &self,
        template_id: TemplateId,
        ip_hash: &str,
        window_secs: u64,
    ) -> Result<()>;

    /// Push an outbound notification onto the delivery queue
    async fn enqueue_notification(&self, job: &NotificationJob) -> Result<()>;

    /// Pop the oldest queued notification, if any
    async fn pop_notification(&self) -> Result<Option<NotificationJob>>;
}
