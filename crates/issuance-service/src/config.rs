//! Configuration management for the issuance service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Default inbound rate limit per template per 60-second window
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Default certificate ID prefix
pub const DEFAULT_CERTIFICATE_PREFIX: &str = "CERT-";

/// Default length of the generated certificate ID suffix
pub const DEFAULT_SUFFIX_LEN: usize = 8;

/// Default cap on outbound notification delivery attempts
pub const DEFAULT_NOTIFY_MAX_ATTEMPTS: u32 = 3;

/// Which backend holds issuance and attempt records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Redis,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Redis => "redis",
            StorageBackend::Memory => "memory",
        }
    }
}

/// How certificate ID suffixes are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStyle {
    /// Uppercase hex suffix from the OS CSPRNG
    Random,
    /// Zero-padded storage-side counter
    Sequential,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub host: String,

    /// API server port
    pub port: u16,

    /// Redis connection URL
    pub redis_url: String,

    /// Record storage backend
    pub storage_backend: StorageBackend,

    /// Base URL used when deriving download links
    pub public_base_url: String,

    /// Directory where rendered PDFs are written
    pub pdf_dir: PathBuf,

    /// Global inbound rate limit per template per 60-second window
    pub rate_limit_per_minute: u32,

    /// Prefix for generated certificate IDs
    pub certificate_prefix: String,

    /// Suffix generation style
    pub certificate_id_style: IdStyle,

    /// Length of the generated suffix
    pub certificate_suffix_len: usize,

    /// External renderer service URL; absent means the built-in stub renderer
    pub renderer_url: Option<String>,

    /// Cap on outbound notification delivery attempts per certificate
    pub notify_max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let storage_backend = match env::var("ACG_STORAGE")
            .unwrap_or_else(|_| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => StorageBackend::Redis,
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!("Unknown ACG_STORAGE backend: {}", other),
        };

        let certificate_id_style = match env::var("ACG_CERT_ID_STYLE")
            .unwrap_or_else(|_| "random".to_string())
            .to_lowercase()
            .as_str()
        {
            "random" => IdStyle::Random,
            "sequential" => IdStyle::Sequential,
            other => anyhow::bail!("Unknown ACG_CERT_ID_STYLE: {}", other),
        };

        let config = Config {
            host: env::var("ACG_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("ACG_PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse()
                .context("Invalid ACG_PORT")?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            storage_backend,

            public_base_url: env::var("ACG_PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8090".to_string()),

            pdf_dir: env::var("ACG_PDF_DIR")
                .unwrap_or_else(|_| "./output/certificates".to_string())
                .into(),

            rate_limit_per_minute: env::var("ACG_RATE_LIMIT")
                .unwrap_or_else(|_| DEFAULT_RATE_LIMIT.to_string())
                .parse()
                .context("Invalid ACG_RATE_LIMIT")?,

            certificate_prefix: env::var("ACG_CERT_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CERTIFICATE_PREFIX.to_string()),

            certificate_id_style,

            certificate_suffix_len: env::var("ACG_CERT_SUFFIX_LEN")
                .unwrap_or_else(|_| DEFAULT_SUFFIX_LEN.to_string())
                .parse()
                .context("Invalid ACG_CERT_SUFFIX_LEN")?,

            renderer_url: env::var("ACG_RENDERER_URL").ok().filter(|s| !s.is_empty()),

            notify_max_attempts: env::var("ACG_NOTIFY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| DEFAULT_NOTIFY_MAX_ATTEMPTS.to_string())
                .parse()
                .context("Invalid ACG_NOTIFY_MAX_ATTEMPTS")?,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("ACG_PORT must be greater than 0");
        }

        if self.rate_limit_per_minute == 0 {
            anyhow::bail!("ACG_RATE_LIMIT must be greater than 0");
        }

        if self.certificate_suffix_len < 4 || self.certificate_suffix_len > 32 {
            anyhow::bail!("ACG_CERT_SUFFIX_LEN must be between 4 and 32");
        }

        if self.notify_max_attempts == 0 {
            anyhow::bail!("ACG_NOTIFY_MAX_ATTEMPTS must be greater than 0");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ensure the PDF output directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.pdf_dir).with_context(|| {
            format!(
                "Failed to create PDF output directory: {}",
                self.pdf_dir.display()
            )
        })?;

        Ok(())
    }
}
