//! Storage of rendered PDFs
//!
//! Rendered bytes are written once and read back at download time through
//! the [`PdfStore`] trait. The file-backed store is the deployment default;
//! the in-memory one backs tests.

use std::collections::HashMap;
use std::path::PathBuf;

use acg_common::{Error, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait PdfStore: Send + Sync {
    /// Persist rendered bytes, returning the path to store on the
    /// issuance record
    async fn save(&self, bytes: &[u8]) -> Result<String>;

    /// Read back the bytes at a previously returned path
    async fn load(&self, pdf_path: &str) -> Result<Vec<u8>>;

    /// Remove the file at a previously returned path
    async fn delete(&self, pdf_path: &str) -> Result<()>;
}

/// Stores PDFs as `{uuid}.pdf` files under a configured directory
pub struct FilePdfStore {
    dir: PathBuf,
}

impl FilePdfStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PdfStore for FilePdfStore {
    async fn save(&self, bytes: &[u8]) -> Result<String> {
        let path = self.dir.join(format!("{}.pdf", Uuid::new_v4()));
        tokio::fs::write(&path, bytes).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    async fn load(&self, pdf_path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(pdf_path).await?)
    }

    async fn delete(&self, pdf_path: &str) -> Result<()> {
        tokio::fs::remove_file(pdf_path).await?;
        debug!("Removed {}", pdf_path);
        Ok(())
    }
}

/// Keeps PDFs in a map under `mem://` paths
#[derive(Default)]
pub struct MemoryPdfStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPdfStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of PDFs currently held
    pub async fn stored_count(&self) -> usize {
        self.files.lock().await.len()
    }
}

#[async_trait]
impl PdfStore for MemoryPdfStore {
    async fn save(&self, bytes: &[u8]) -> Result<String> {
        let path = format!("mem://{}.pdf", Uuid::new_v4());
        self.files.lock().await.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn load(&self, pdf_path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(pdf_path)
            .cloned()
            .ok_or_else(|| Error::StorageFailed(format!("no stored PDF at {pdf_path}")))
    }

    async fn delete(&self, pdf_path: &str) -> Result<()> {
        self.files.lock().await.remove(pdf_path);
        Ok(())
    }
}
