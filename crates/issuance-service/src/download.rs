//! Download token verification
//!
//! A PDF is handed out only when the caller presents both the certificate
//! ID and the matching download token. A wrong token gets the same answer
//! as an unknown certificate, so probing one does not confirm the other.

use acg_common::{CertificateId, Error, IssuanceRecord, Result};

use crate::storage::Storage;

/// Check a download request, returning the issuance record on success.
pub async fn verify_download(
    storage: &dyn Storage,
    certificate_id: &CertificateId,
    token: Option<&str>,
) -> Result<IssuanceRecord> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(Error::MissingToken),
    };

    let record = storage
        .get_issuance(certificate_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("certificate {certificate_id}")))?;

    if !record.download_token.matches(token) {
        return Err(Error::NotFound(format!("certificate {certificate_id}")));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};
    use acg_common::{DownloadToken, Origin, TemplateId};
    use chrono::Utc;

    async fn storage_with_record() -> (MemoryStorage, CertificateId, DownloadToken) {
        let storage = MemoryStorage::new();
        let certificate_id = CertificateId::new("CERT-TEST01");
        let token = DownloadToken::generate();
        let record = IssuanceRecord::new(
            certificate_id.clone(),
            TemplateId::new(3),
            Origin::Webhook,
            None,
            serde_json::Map::new(),
            "mem://x.pdf".to_string(),
            token.clone(),
            Utc::now(),
        );
        storage.insert_issuance(&record).await.unwrap();
        (storage, certificate_id, token)
    }

    #[tokio::test]
    async fn test_valid_token_returns_the_record() {
        let (storage, id, token) = storage_with_record().await;
        let record = verify_download(&storage, &id, Some(token.as_str()))
            .await
            .unwrap();
        assert_eq!(record.certificate_id, id);
    }

    #[tokio::test]
    async fn test_missing_or_empty_token_is_rejected() {
        let (storage, id, _token) = storage_with_record().await;
        assert!(matches!(
            verify_download(&storage, &id, None).await,
            Err(Error::MissingToken)
        ));
        assert!(matches!(
            verify_download(&storage, &id, Some("")).await,
            Err(Error::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_wrong_token_reads_as_not_found() {
        let (storage, id, _token) = storage_with_record().await;
        let result = verify_download(&storage, &id, Some("deadbeef")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_certificate_reads_as_not_found() {
        let (storage, _id, token) = storage_with_record().await;
        let result = verify_download(
            &storage,
            &CertificateId::new("CERT-NOPE"),
            Some(token.as_str()),
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
