//! Certificate rendering
//!
//! Turning a template plus variables into PDF bytes is delegated to a
//! [`CertificateRenderer`]. Deployments point at an external render service
//! over HTTP; without one configured, a built-in stub writes a minimal
//! single-page PDF so the rest of the pipeline stays exercisable.

use acg_common::{Error, Result, TemplateId};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

#[async_trait]
pub trait CertificateRenderer: Send + Sync {
    /// Render one certificate to PDF bytes
    async fn render(
        &self,
        template_id: TemplateId,
        variables: &serde_json::Map<String, Value>,
    ) -> Result<Vec<u8>>;
}

/// Renderer backed by an external HTTP render service
pub struct HttpRenderer {
    client: Client,
    base_url: String,
}

impl HttpRenderer {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CertificateRenderer for HttpRenderer {
    async fn render(
        &self,
        template_id: TemplateId,
        variables: &serde_json::Map<String, Value>,
    ) -> Result<Vec<u8>> {
        let url = format!("{}/render", self.base_url);
        let body = serde_json::json!({
            "template_id": template_id,
            "variables": variables,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RenderFailed(format!("render service unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::RenderFailed(format!(
                "render service returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::RenderFailed(format!("failed to read render response: {e}")))?;
        debug!(
            "Rendered certificate for template {} ({} bytes)",
            template_id,
            bytes.len()
        );
        Ok(bytes.to_vec())
    }
}

/// Fallback renderer that writes a minimal one-page PDF listing the
/// template and its variables
#[derive(Default)]
pub struct StubRenderer;

#[async_trait]
impl CertificateRenderer for StubRenderer {
    async fn render(
        &self,
        template_id: TemplateId,
        variables: &serde_json::Map<String, Value>,
    ) -> Result<Vec<u8>> {
        Ok(build_stub_pdf(template_id, variables))
    }
}

/// Assemble a valid single-page PDF by hand. Object offsets are recorded as
/// the buffer grows, so the xref table is always consistent.
fn build_stub_pdf(
    template_id: TemplateId,
    variables: &serde_json::Map<String, Value>,
) -> Vec<u8> {
    let mut lines = vec![format!("Certificate (template {template_id})")];
    for (key, value) in variables {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("{key}: {rendered}"));
    }

    let mut content = String::new();
    let mut y = 720;
    for line in &lines {
        content.push_str(&format!(
            "BT /F1 12 Tf 72 {y} Td ({}) Tj ET\n",
            escape_pdf_text(line)
        ));
        y -= 18;
    }

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
            .to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}endstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut pdf: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", index + 1, object).as_bytes());
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    pdf
}

/// Escape the characters with meaning inside a PDF literal string
fn escape_pdf_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '(' => escaped.push_str("\\("),
            ')' => escaped.push_str("\\)"),
            '\n' | '\r' => escaped.push(' '),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_variables() -> serde_json::Map<String, Value> {
        let mut vars = serde_json::Map::new();
        vars.insert("name".into(), json!("Ada Lovelace"));
        vars.insert("score".into(), json!(98));
        vars
    }

    #[tokio::test]
    async fn test_stub_renderer_produces_a_pdf() {
        let renderer = StubRenderer;
        let bytes = renderer
            .render(TemplateId::new(7), &sample_variables())
            .await
            .unwrap();

        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Ada Lovelace"));
        assert!(text.contains("score: 98"));
    }

    #[test]
    fn test_xref_offset_points_at_the_xref_table() {
        let bytes = build_stub_pdf(TemplateId::new(1), &sample_variables());
        let text = String::from_utf8_lossy(&bytes);

        let startxref = text
            .rfind("startxref\n")
            .map(|i| i + "startxref\n".len())
            .unwrap();
        let offset: usize = text[startxref..]
            .lines()
            .next()
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(&bytes[offset..offset + 4], b"xref");
    }

    #[test]
    fn test_escape_pdf_text() {
        assert_eq!(escape_pdf_text("plain"), "plain");
        assert_eq!(escape_pdf_text("a(b)c"), "a\\(b\\)c");
        assert_eq!(escape_pdf_text("back\\slash"), "back\\\\slash");
        assert_eq!(escape_pdf_text("two\nlines"), "two lines");
    }
}
