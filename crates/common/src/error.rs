use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Webhook not configured for this template")]
    Unconfigured,

    #[error("Invalid API key")]
    AuthFailed,

    #[error("Invalid payload signature")]
    SignatureFailed,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Rendering failed: {0}")]
    RenderFailed(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing download token")]
    MissingToken,

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status for this error. The intake pipeline records the same code
    /// in the attempt log that the handler returns to the caller, so the
    /// mapping lives here rather than in the service crate.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Unconfigured => 400,
            Error::AuthFailed | Error::SignatureFailed => 401,
            Error::RateLimited => 429,
            Error::InvalidPayload(_) => 400,
            Error::MissingToken => 400,
            Error::NotFound(_) => 404,
            Error::RenderFailed(_)
            | Error::StorageFailed(_)
            | Error::Redis(_)
            | Error::Json(_)
            | Error::Io(_)
            | Error::Other(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
