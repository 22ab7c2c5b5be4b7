//! In-memory storage backend for tests and local development
//!
//! Holds everything in a single mutex-guarded state struct. Rate-limit
//! windows expire against the injected clock, so tests can advance time
//! without sleeping.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use acg_common::{
    AttemptRecord, CertificateId, Clock, Error, IssuanceRecord, Result, SystemClock, TemplateId,
    TemplateWebhookConfig, WebhookStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::models::NotificationJob;
use crate::storage::Storage;

/// One rate-limit window for a template and client
struct RateWindow {
    count: u32,
    expires_at: DateTime<Utc>,
}

impl Default for RateWindow {
    fn default() -> Self {
        Self {
            count: 0,
            expires_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

#[derive(Default)]
struct State {
    webhook_configs: HashMap<u64, TemplateWebhookConfig>,
    issuances: HashMap<String, IssuanceRecord>,
    template_certificates: HashMap<u64, Vec<String>>,
    attempts: Vec<AttemptRecord>,
    rate_windows: HashMap<(u64, String), RateWindow>,
    notifications: VecDeque<NotificationJob>,
    certificate_seq: u64,
}

/// In-memory [`Storage`] implementation
pub struct MemoryStorage {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build a backend whose rate-limit windows expire against `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_webhook_config(
        &self,
        template_id: TemplateId,
        config: &TemplateWebhookConfig,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .webhook_configs
            .insert(template_id.as_u64(), config.clone());
        Ok(())
    }

    async fn get_webhook_config(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<TemplateWebhookConfig>> {
        let state = self.state.lock().await;
        Ok(state.webhook_configs.get(&template_id.as_u64()).cloned())
    }

    async fn delete_webhook_config(&self, template_id: TemplateId) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.webhook_configs.remove(&template_id.as_u64()).is_some())
    }

    async fn insert_issuance(&self, record: &IssuanceRecord) -> Result<bool> {
        let mut state = self.state.lock().await;
        let key = record.certificate_id.as_str().to_string();
        if state.issuances.contains_key(&key) {
            return Ok(false);
        }
        state.issuances.insert(key.clone(), record.clone());
        state
            .template_certificates
            .entry(record.template_id.as_u64())
            .or_default()
            .push(key);
        Ok(true)
    }

    async fn get_issuance(&self, certificate_id: &CertificateId) -> Result<Option<IssuanceRecord>> {
        let state = self.state.lock().await;
        Ok(state.issuances.get(certificate_id.as_str()).cloned())
    }

    async fn issuances_for_template(&self, template_id: TemplateId) -> Result<Vec<IssuanceRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<IssuanceRecord> = state
            .template_certificates
            .get(&template_id.as_u64())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.issuances.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update_webhook_status(
        &self,
        certificate_id: &CertificateId,
        status: WebhookStatus,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .issuances
            .get_mut(certificate_id.as_str())
            .ok_or_else(|| Error::NotFound(format!("certificate {certificate_id}")))?;
        record.webhook_status = status;
        Ok(())
    }

    async fn count_issuances(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.issuances.len())
    }

    async fn next_certificate_sequence(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.certificate_seq += 1;
        Ok(state.certificate_seq)
    }

    async fn append_attempt(&self, attempt: &AttemptRecord) -> Result<u64> {
        let mut state = self.state.lock().await;
        let id = state.attempts.len() as u64 + 1;
        let mut stored = attempt.clone();
        stored.id = id;
        state.attempts.push(stored);
        Ok(id)
    }

    async fn attempts_for_template(
        &self,
        template_id: TemplateId,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>> {
        let state = self.state.lock().await;
        let mut attempts: Vec<AttemptRecord> = state
            .attempts
            .iter()
            .filter(|a| a.template_id == template_id)
            .cloned()
            .collect();
        // Same created_at is common under a fixed test clock; the append
        // order breaks the tie.
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn rate_count(&self, template_id: TemplateId, ip_hash: &str) -> Result<u32> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let count = state
            .rate_windows
            .get(&(template_id.as_u64(), ip_hash.to_string()))
            .filter(|window| window.expires_at > now)
            .map(|window| window.count)
            .unwrap_or(0);
        Ok(count)
    }

    async fn rate_increment(
        &self,
        template_id: TemplateId,
        ip_hash: &str,
        window_secs: u64,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let window = state
            .rate_windows
            .entry((template_id.as_u64(), ip_hash.to_string()))
            .or_default();
        if window.expires_at <= now {
            window.count = 0;
            window.expires_at = now + Duration::seconds(window_secs as i64);
        }
        window.count += 1;
        Ok(())
    }

    async fn enqueue_notification(&self, job: &NotificationJob) -> Result<()> {
        let mut state = self.state.lock().await;
        state.notifications.push_back(job.clone());
        Ok(())
    }

    async fn pop_notification(&self) -> Result<Option<NotificationJob>> {
        let mut state = self.state.lock().await;
        Ok(state.notifications.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acg_common::{FixedClock, Origin};
    use chrono::TimeZone;

    fn test_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn record(certificate_id: &str, template_id: u64, created_at: DateTime<Utc>) -> IssuanceRecord {
        IssuanceRecord::new(
            CertificateId::new(certificate_id),
            TemplateId::new(template_id),
            Origin::Webhook,
            None,
            serde_json::Map::new(),
            format!("{certificate_id}.pdf"),
            acg_common::DownloadToken::generate(),
            created_at,
        )
    }

    #[tokio::test]
    async fn test_webhook_config_roundtrip() {
        let storage = MemoryStorage::new();
        let template = TemplateId::new(7);

        assert!(storage.get_webhook_config(template).await.unwrap().is_none());

        let config = TemplateWebhookConfig::new("wh_key");
        storage.put_webhook_config(template, &config).await.unwrap();
        let loaded = storage.get_webhook_config(template).await.unwrap().unwrap();
        assert_eq!(loaded.api_key, "wh_key");

        assert!(storage.delete_webhook_config(template).await.unwrap());
        assert!(storage.get_webhook_config(template).await.unwrap().is_none());
        // Deleting again reports nothing removed
        assert!(!storage.delete_webhook_config(template).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_issuance_rejects_duplicate_id() {
        let storage = MemoryStorage::new();
        let now = Utc::now();

        assert!(storage.insert_issuance(&record("CERT-1", 1, now)).await.unwrap());
        assert!(!storage.insert_issuance(&record("CERT-1", 1, now)).await.unwrap());
        assert_eq!(storage.count_issuances().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_issuances_for_template_newest_first() {
        let storage = MemoryStorage::new();
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        storage.insert_issuance(&record("CERT-A", 1, base)).await.unwrap();
        storage
            .insert_issuance(&record("CERT-B", 1, base + Duration::seconds(10)))
            .await
            .unwrap();
        storage.insert_issuance(&record("CERT-C", 2, base)).await.unwrap();

        let records = storage.issuances_for_template(TemplateId::new(1)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].certificate_id.as_str(), "CERT-B");
        assert_eq!(records[1].certificate_id.as_str(), "CERT-A");
    }

    #[tokio::test]
    async fn test_update_webhook_status_missing_certificate() {
        let storage = MemoryStorage::new();
        let result = storage
            .update_webhook_status(&CertificateId::new("CERT-missing"), WebhookStatus::Sent)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_append_attempt_assigns_increasing_ids() {
        let storage = MemoryStorage::new();
        let now = Utc::now();

        let attempt = AttemptRecord::incoming(
            TemplateId::new(1),
            None,
            "/templates/1/incoming".to_string(),
            "{}".to_string(),
            401,
            false,
            Some("authentication failed".to_string()),
            Some("10.0.0.1".to_string()),
            now,
        );

        assert_eq!(storage.append_attempt(&attempt).await.unwrap(), 1);
        assert_eq!(storage.append_attempt(&attempt).await.unwrap(), 2);

        let attempts = storage
            .attempts_for_template(TemplateId::new(1), 50)
            .await
            .unwrap();
        assert_eq!(attempts.len(), 2);
        // Newest first under a tied timestamp means the higher ID leads
        assert_eq!(attempts[0].id, 2);
        assert_eq!(attempts[1].id, 1);
    }

    #[tokio::test]
    async fn test_attempts_limit() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let attempt = AttemptRecord::incoming(
            TemplateId::new(1),
            None,
            "/templates/1/incoming".to_string(),
            "{}".to_string(),
            200,
            true,
            None,
            None,
            now,
        );

        for _ in 0..5 {
            storage.append_attempt(&attempt).await.unwrap();
        }

        let attempts = storage
            .attempts_for_template(TemplateId::new(1), 3)
            .await
            .unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].id, 5);
    }

    #[tokio::test]
    async fn test_rate_window_expires_with_clock() {
        let clock = test_clock();
        let storage = MemoryStorage::with_clock(clock.clone());
        let template = TemplateId::new(3);

        storage.rate_increment(template, "abc", 60).await.unwrap();
        storage.rate_increment(template, "abc", 60).await.unwrap();
        assert_eq!(storage.rate_count(template, "abc").await.unwrap(), 2);

        // Another client hash counts separately
        assert_eq!(storage.rate_count(template, "def").await.unwrap(), 0);

        clock.advance(Duration::seconds(61));
        assert_eq!(storage.rate_count(template, "abc").await.unwrap(), 0);

        storage.rate_increment(template, "abc", 60).await.unwrap();
        assert_eq!(storage.rate_count(template, "abc").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_notification_queue_fifo() {
        let storage = MemoryStorage::new();
        let now = Utc::now();

        for i in 0..3 {
            let job = NotificationJob {
                certificate_id: CertificateId::new(format!("CERT-{i}")),
                template_id: TemplateId::new(1),
                enqueued_at: now,
            };
            storage.enqueue_notification(&job).await.unwrap();
        }

        let first = storage.pop_notification().await.unwrap().unwrap();
        assert_eq!(first.certificate_id.as_str(), "CERT-0");
        let second = storage.pop_notification().await.unwrap().unwrap();
        assert_eq!(second.certificate_id.as_str(), "CERT-1");

        storage.pop_notification().await.unwrap();
        assert!(storage.pop_notification().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_certificate_sequence_increments() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.next_certificate_sequence().await.unwrap(), 1);
        assert_eq!(storage.next_certificate_sequence().await.unwrap(), 2);
        assert_eq!(storage.next_certificate_sequence().await.unwrap(), 3);
    }
}
