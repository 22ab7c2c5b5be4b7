pub mod error;
pub mod ids;
pub mod records;
pub mod webhook;
pub mod signature;
pub mod clock;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use ids::{CertificateId, DownloadToken, TemplateId};
pub use records::{AttemptRecord, Direction, EmailStatus, IssuanceRecord, Origin, WebhookStatus};
pub use webhook::TemplateWebhookConfig;
