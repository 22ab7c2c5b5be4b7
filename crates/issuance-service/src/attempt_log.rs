//! Audit logging of webhook attempts
//!
//! Every inbound webhook call and every outbound delivery try produces one
//! attempt row. Writing the row must never change the caller's outcome, so
//! storage failures here are logged and swallowed.

use std::sync::Arc;

use acg_common::AttemptRecord;
use tracing::error;

use crate::storage::Storage;

#[derive(Clone)]
pub struct AttemptLogger {
    storage: Arc<dyn Storage>,
}

impl AttemptLogger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Append one attempt row. A broken audit log must never mask the
    /// response the caller is owed, so errors stop here.
    pub async fn record(&self, attempt: AttemptRecord) {
        if let Err(e) = self.storage.append_attempt(&attempt).await {
            error!("Failed to record webhook attempt: {}", e);
        }
    }
}
