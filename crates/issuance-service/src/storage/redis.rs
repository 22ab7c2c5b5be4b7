//! Redis storage backend
//!
//! Records are stored as JSON strings under typed keys, with Redis sets as
//! secondary indexes. Uniqueness of certificate IDs rides on SET NX, and
//! rate-limit counters ride on INCR with a window-long expiry.

use acg_common::{
    AttemptRecord, CertificateId, Error, IssuanceRecord, Result, TemplateId,
    TemplateWebhookConfig, WebhookStatus,
};
use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::models::NotificationJob;
use crate::storage::Storage;

const NOTIFY_QUEUE_KEY: &str = "notify:queue";

/// Redis-backed [`Storage`] implementation
pub struct RedisStorage {
    conn: ConnectionManager,
}

impl RedisStorage {
    /// Connect to Redis and build the storage backend
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis at {}", redis_url);
        Ok(Self { conn })
    }

    fn webhook_config_key(template_id: TemplateId) -> String {
        format!("template:{}:webhook", template_id.as_u64())
    }

    fn certificate_key(certificate_id: &CertificateId) -> String {
        format!("certificate:{}", certificate_id.as_str())
    }

    fn template_certificates_key(template_id: TemplateId) -> String {
        format!("template:{}:certificates", template_id.as_u64())
    }

    fn attempt_key(id: u64) -> String {
        format!("attempt:{id}")
    }

    fn template_attempts_key(template_id: TemplateId) -> String {
        format!("template:{}:attempts", template_id.as_u64())
    }

    fn rate_key(template_id: TemplateId, ip_hash: &str) -> String {
        format!("ratelimit:{}:{}", template_id.as_u64(), ip_hash)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn put_webhook_config(
        &self,
        template_id: TemplateId,
        config: &TemplateWebhookConfig,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(config)?;
        let _: () = conn
            .set(Self::webhook_config_key(template_id), json)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        debug!("Stored webhook config for template {}", template_id);
        Ok(())
    }

    async fn get_webhook_config(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<TemplateWebhookConfig>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(Self::webhook_config_key(template_id))
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_webhook_config(&self, template_id: TemplateId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: bool = conn
            .del(Self::webhook_config_key(template_id))
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(deleted)
    }

    async fn insert_issuance(&self, record: &IssuanceRecord) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = Self::certificate_key(&record.certificate_id);
        let json = serde_json::to_string(record)?;

        // SET NX returns nil when the certificate ID is already taken
        let outcome: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        if outcome.is_none() {
            return Ok(false);
        }

        conn.sadd::<_, _, ()>("certificates:all", record.certificate_id.as_str())
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        conn.sadd::<_, _, ()>(
            Self::template_certificates_key(record.template_id),
            record.certificate_id.as_str(),
        )
        .await
        .map_err(|e| Error::Redis(e.to_string()))?;

        debug!(
            "Stored issuance {} for template {}",
            record.certificate_id, record.template_id
        );
        Ok(true)
    }

    async fn get_issuance(&self, certificate_id: &CertificateId) -> Result<Option<IssuanceRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(Self::certificate_key(certificate_id))
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn issuances_for_template(&self, template_id: TemplateId) -> Result<Vec<IssuanceRecord>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(Self::template_certificates_key(template_id))
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let json: Option<String> = conn
                .get(Self::certificate_key(&CertificateId::new(id)))
                .await
                .map_err(|e| Error::Redis(e.to_string()))?;
            if let Some(json) = json {
                records.push(serde_json::from_str::<IssuanceRecord>(&json)?);
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update_webhook_status(
        &self,
        certificate_id: &CertificateId,
        status: WebhookStatus,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::certificate_key(certificate_id);
        let json: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        let json = json.ok_or_else(|| Error::NotFound(format!("certificate {certificate_id}")))?;

        let mut record: IssuanceRecord = serde_json::from_str(&json)?;
        record.webhook_status = status;

        let _: () = conn
            .set(&key, serde_json::to_string(&record)?)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(())
    }

    async fn count_issuances(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn
            .scard("certificates:all")
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(count)
    }

    async fn next_certificate_sequence(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let seq: u64 = conn
            .incr("certificate:seq", 1)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(seq)
    }

    async fn append_attempt(&self, attempt: &AttemptRecord) -> Result<u64> {
        let mut conn = self.conn.clone();
        let id: u64 = conn
            .incr("attempts:seq", 1)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;

        let mut stored = attempt.clone();
        stored.id = id;
        let json = serde_json::to_string(&stored)?;

        let _: () = conn
            .set(Self::attempt_key(id), json)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        conn.sadd::<_, _, ()>(Self::template_attempts_key(stored.template_id), id)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(id)
    }

    async fn attempts_for_template(
        &self,
        template_id: TemplateId,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>> {
        let mut conn = self.conn.clone();
        let ids: Vec<u64> = conn
            .smembers(Self::template_attempts_key(template_id))
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;

        let mut attempts = Vec::with_capacity(ids.len());
        for id in ids {
            let json: Option<String> = conn
                .get(Self::attempt_key(id))
                .await
                .map_err(|e| Error::Redis(e.to_string()))?;
            if let Some(json) = json {
                attempts.push(serde_json::from_str::<AttemptRecord>(&json)?);
            }
        }

        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn rate_count(&self, template_id: TemplateId, ip_hash: &str) -> Result<u32> {
        let mut conn = self.conn.clone();
        let count: Option<u32> = conn
            .get(Self::rate_key(template_id, ip_hash))
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(count.unwrap_or(0))
    }

    async fn rate_increment(
        &self,
        template_id: TemplateId,
        ip_hash: &str,
        window_secs: u64,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::rate_key(template_id, ip_hash);
        let count: u32 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        // First hit in the window starts its expiry
        if count == 1 {
            let _: () = conn
                .expire(&key, window_secs as i64)
                .await
                .map_err(|e| Error::Redis(e.to_string()))?;
        }
        Ok(())
    }

    async fn enqueue_notification(&self, job: &NotificationJob) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job)?;
        conn.rpush::<_, _, ()>(NOTIFY_QUEUE_KEY, json)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(())
    }

    async fn pop_notification(&self) -> Result<Option<NotificationJob>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .lpop(NOTIFY_QUEUE_KEY, None)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
