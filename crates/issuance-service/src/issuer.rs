//! Certificate issuance
//!
//! The issuer owns the full issue path: render the PDF, persist it, pick a
//! certificate ID and write the issuance record. IDs are unique by
//! construction of the storage insert; on the rare collision the issuer
//! draws a fresh ID and retries.

use std::sync::Arc;

use acg_common::{
    CertificateId, Clock, DownloadToken, Error, IssuanceRecord, Origin, Result, TemplateId,
};
use tracing::{info, warn};

use crate::config::{Config, IdStyle};
use crate::pdf::PdfStore;
use crate::render::CertificateRenderer;
use crate::storage::Storage;

/// Collision retries before giving up on finding a free certificate ID
const MAX_ID_ATTEMPTS: usize = 5;

/// The slice of configuration the issuer needs
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub prefix: String,
    pub id_style: IdStyle,
    pub suffix_len: usize,
    pub public_base_url: String,
}

impl From<&Config> for IssuerSettings {
    fn from(config: &Config) -> Self {
        Self {
            prefix: config.certificate_prefix.clone(),
            id_style: config.certificate_id_style,
            suffix_len: config.certificate_suffix_len,
            public_base_url: config.public_base_url.clone(),
        }
    }
}

/// Outcome of a successful issuance
#[derive(Debug)]
pub struct IssuedCertificate {
    pub certificate_id: CertificateId,
    pub download_url: String,
}

#[derive(Clone)]
pub struct CertificateIssuer {
    storage: Arc<dyn Storage>,
    renderer: Arc<dyn CertificateRenderer>,
    pdf_store: Arc<dyn PdfStore>,
    clock: Arc<dyn Clock>,
    settings: Arc<IssuerSettings>,
}

impl CertificateIssuer {
    pub fn new(
        storage: Arc<dyn Storage>,
        renderer: Arc<dyn CertificateRenderer>,
        pdf_store: Arc<dyn PdfStore>,
        clock: Arc<dyn Clock>,
        settings: IssuerSettings,
    ) -> Self {
        Self {
            storage,
            renderer,
            pdf_store,
            clock,
            settings: Arc::new(settings),
        }
    }

    /// Issue one certificate. Rendering happens before anything is written,
    /// so a failed render leaves no trace in storage, and a stored PDF is
    /// removed again when no record could be written for it.
    pub async fn issue(
        &self,
        template_id: TemplateId,
        variables: serde_json::Map<String, serde_json::Value>,
        origin: Origin,
        user_id: Option<u64>,
    ) -> Result<IssuedCertificate> {
        let pdf_bytes = self.renderer.render(template_id, &variables).await?;
        let pdf_path = self.pdf_store.save(&pdf_bytes).await?;
        let token = DownloadToken::generate();

        match self
            .insert_with_unique_id(template_id, &variables, origin, user_id, &pdf_path, &token)
            .await
        {
            Ok(certificate_id) => {
                let url = download_url(&self.settings.public_base_url, &certificate_id, &token);
                Ok(IssuedCertificate {
                    certificate_id,
                    download_url: url,
                })
            }
            Err(err) => {
                // Clean up the file no record references
                let _ = self.pdf_store.delete(&pdf_path).await;
                Err(err)
            }
        }
    }

    /// Draw certificate IDs until the insert lands on a free one
    async fn insert_with_unique_id(
        &self,
        template_id: TemplateId,
        variables: &serde_json::Map<String, serde_json::Value>,
        origin: Origin,
        user_id: Option<u64>,
        pdf_path: &str,
        token: &DownloadToken,
    ) -> Result<CertificateId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let certificate_id = self.next_certificate_id().await?;
            let record = IssuanceRecord::new(
                certificate_id.clone(),
                template_id,
                origin,
                user_id,
                variables.clone(),
                pdf_path.to_string(),
                token.clone(),
                self.clock.now(),
            );

            if self.storage.insert_issuance(&record).await? {
                info!(
                    "Issued certificate {} for template {}",
                    certificate_id, template_id
                );
                return Ok(certificate_id);
            }
            warn!("Certificate ID {} already taken, retrying", certificate_id);
        }

        Err(Error::StorageFailed(format!(
            "no free certificate ID after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    async fn next_certificate_id(&self) -> Result<CertificateId> {
        let suffix = match self.settings.id_style {
            IdStyle::Random => random_suffix(self.settings.suffix_len),
            IdStyle::Sequential => {
                let seq = self.storage.next_certificate_sequence().await?;
                format!("{seq:0width$}", width = self.settings.suffix_len)
            }
        };
        Ok(CertificateId::new(format!(
            "{}{}",
            self.settings.prefix, suffix
        )))
    }
}

/// Build the public download link for an issued certificate
pub fn download_url(
    public_base_url: &str,
    certificate_id: &CertificateId,
    token: &DownloadToken,
) -> String {
    format!(
        "{}/certificates/{}/download?token={}",
        public_base_url.trim_end_matches('/'),
        certificate_id,
        token.as_str()
    )
}

fn random_suffix(len: usize) -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut bytes = vec![0u8; len.div_ceil(2)];
    OsRng.fill_bytes(&mut bytes);
    let mut suffix = hex::encode_upper(bytes);
    suffix.truncate(len);
    suffix
}
