//! Per-template, per-client rate limiting
//!
//! Fixed one-minute windows counted in storage. Client addresses are hashed
//! before they become storage keys, so raw IPs never land in Redis.

use std::sync::Arc;

use acg_common::{Error, Result, TemplateId};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::storage::Storage;

/// Length of one rate-limit window in seconds
pub const WINDOW_SECS: u64 = 60;

#[derive(Clone)]
pub struct RateLimiter {
    storage: Arc<dyn Storage>,
}

impl RateLimiter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Count one request against the window, rejecting it when the limit
    /// is already spent.
    pub async fn check_and_increment(
        &self,
        template_id: TemplateId,
        ip: &str,
        limit: u32,
    ) -> Result<()> {
        let ip_hash = hash_ip(ip);
        let count = self.storage.rate_count(template_id, &ip_hash).await?;
        if count >= limit {
            warn!(
                "Rate limit hit for template {} ({} requests this window, limit {})",
                template_id, count, limit
            );
            return Err(Error::RateLimited);
        }
        self.storage
            .rate_increment(template_id, &ip_hash, WINDOW_SECS)
            .await
    }
}

fn hash_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(16);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use acg_common::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    fn limiter_with_clock() -> (RateLimiter, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
        (RateLimiter::new(storage), clock)
    }

    #[test]
    fn test_hash_ip_is_stable_and_short() {
        assert_eq!(hash_ip("203.0.113.9"), hash_ip("203.0.113.9"));
        assert_ne!(hash_ip("203.0.113.9"), hash_ip("203.0.113.10"));
        assert_eq!(hash_ip("203.0.113.9").len(), 16);
    }

    #[tokio::test]
    async fn test_requests_over_the_limit_are_rejected() {
        let (limiter, _clock) = limiter_with_clock();
        let template = TemplateId::new(1);

        for _ in 0..3 {
            limiter
                .check_and_increment(template, "203.0.113.9", 3)
                .await
                .unwrap();
        }

        let result = limiter.check_and_increment(template, "203.0.113.9", 3).await;
        assert!(matches!(result, Err(Error::RateLimited)));
    }

    #[tokio::test]
    async fn test_window_resets_after_a_minute() {
        let (limiter, clock) = limiter_with_clock();
        let template = TemplateId::new(1);

        limiter
            .check_and_increment(template, "203.0.113.9", 1)
            .await
            .unwrap();
        assert!(limiter
            .check_and_increment(template, "203.0.113.9", 1)
            .await
            .is_err());

        clock.advance(Duration::seconds(61));
        limiter
            .check_and_increment(template, "203.0.113.9", 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clients_are_limited_independently() {
        let (limiter, _clock) = limiter_with_clock();
        let template = TemplateId::new(1);

        limiter
            .check_and_increment(template, "203.0.113.9", 1)
            .await
            .unwrap();
        limiter
            .check_and_increment(template, "203.0.113.10", 1)
            .await
            .unwrap();
    }
}
