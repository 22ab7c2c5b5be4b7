//! Per-template webhook configuration.

use serde::{Deserialize, Serialize};

/// Webhook settings stored per template. A template with no stored config,
/// or one whose API key is empty, has no webhook set up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateWebhookConfig {
    /// Shared key inbound callers must present
    pub api_key: String,

    /// HMAC-SHA256 signing secret; empty or absent disables the signature check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_secret: Option<String>,

    /// Rate limit override for this template; 0 or absent means the global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Where issuance notifications are delivered; absent disables delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,

    /// Secret used to sign outbound notification bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_secret: Option<String>,
}

impl TemplateWebhookConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            signature_secret: None,
            rate_limit: None,
            notify_url: None,
            notify_secret: None,
        }
    }

    /// Whether the webhook is set up at all
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// The template override when positive, else the global default
    pub fn effective_rate_limit(&self, global_default: u32) -> u32 {
        match self.rate_limit {
            Some(limit) if limit > 0 => limit,
            _ => global_default,
        }
    }

    /// Inbound signing secret, filtering out empty strings
    pub fn signing_secret(&self) -> Option<&str> {
        self.signature_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Outbound delivery target, filtering out empty strings
    pub fn notify_target(&self) -> Option<&str> {
        self.notify_url.as_deref().filter(|s| !s.is_empty())
    }

    /// Secret for signing outbound notification bodies
    pub fn notify_signing_secret(&self) -> Option<&str> {
        self.notify_secret.as_deref().filter(|s| !s.is_empty())
    }
}
