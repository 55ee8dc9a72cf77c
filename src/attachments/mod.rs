//! Document and invoice extraction for received attachments
//!
//! PDFs go through their embedded text layer, images through the vision
//! mode of the same extraction service. Both paths share one JSON contract
//! (see [`EXTRACTION_INSTRUCTIONS`]).

mod pdf;
mod result;

use std::sync::Arc;

use async_trait::async_trait;

pub use result::{BillSummary, EXTRACTION_INSTRUCTIONS, ExtractionResult, UNRECOGNIZED_KIND, parse_response};

/// Upper bound on PDF text forwarded to the service
const MAX_DOCUMENT_CHARS: usize = 24_000;

/// Input handed to the extraction service
#[derive(Debug, Clone, Copy)]
pub enum ExtractionInput<'a> {
    /// Plain text recovered from a document
    Text(&'a str),
    /// Raw image bytes for the vision mode
    Image { data: &'a [u8], mime_type: &'a str },
}

/// Structured-extraction backend returning raw completion text
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, instructions: &str, input: ExtractionInput<'_>) -> crate::Result<String>;
}

/// Why an extraction produced no usable result
///
/// Distinct from [`ExtractionResult::Unrecognized`], which is a successful
/// answer about a non-bill document.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("pdf text extraction failed: {0}")]
    PdfText(String),

    #[error("document has no text layer")]
    EmptyText,

    #[error("unsupported mime type: {0}")]
    UnsupportedMime(String),

    #[error("extraction service failed: {0}")]
    Service(String),

    #[error("no JSON object in service response")]
    NoJson,

    #[error("invalid extraction JSON: {0}")]
    Parse(String),
}

/// Runs downloaded media through the extraction service
#[derive(Clone)]
pub struct DocumentExtractor {
    service: Arc<dyn ExtractionService>,
}

impl DocumentExtractor {
    #[must_use]
    pub fn new(service: Arc<dyn ExtractionService>) -> Self {
        Self { service }
    }

    /// Extract a structured result from media bytes
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError`] if the input is unreadable, the service
    /// fails, or its response does not follow the contract
    pub async fn extract(
        &self,
        data: &[u8],
        mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        let mime = base_mime(mime_type);

        let raw = if mime == "application/pdf" {
            let text = pdf::extract_text(data.to_vec()).await?;
            let text = truncate_chars(&text, MAX_DOCUMENT_CHARS);
            tracing::debug!(chars = text.len(), "pdf text extracted");
            self.call(ExtractionInput::Text(text)).await?
        } else if mime.starts_with("image/") {
            self.call(ExtractionInput::Image {
                data,
                mime_type: &mime,
            })
            .await?
        } else {
            return Err(ExtractionError::UnsupportedMime(mime));
        };

        parse_response(&raw)
    }

    async fn call(&self, input: ExtractionInput<'_>) -> Result<String, ExtractionError> {
        self.service
            .extract(EXTRACTION_INSTRUCTIONS, input)
            .await
            .map_err(|e| ExtractionError::Service(e.to_string()))
    }
}

/// Lowercased MIME type without parameters ("application/pdf; q=1" -> "application/pdf")
fn base_mime(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recording {
        response: String,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExtractionService for Recording {
        async fn extract(&self, _instructions: &str, input: ExtractionInput<'_>) -> crate::Result<String> {
            let tag = match input {
                ExtractionInput::Text(_) => "text".to_string(),
                ExtractionInput::Image { mime_type, .. } => format!("image:{mime_type}"),
            };
            self.calls.lock().unwrap().push(tag);
            Ok(self.response.clone())
        }
    }

    fn extractor(response: &str) -> (DocumentExtractor, Arc<Recording>) {
        let service = Arc::new(Recording {
            response: response.to_string(),
            calls: Mutex::new(Vec::new()),
        });
        (DocumentExtractor::new(service.clone()), service)
    }

    #[tokio::test]
    async fn image_goes_through_vision() {
        let (extractor, service) = extractor(r#"{"tipo": "luz", "compania": "Endesa"}"#);
        let result = extractor.extract(&[0xff, 0xd8], "image/JPEG").await.unwrap();

        assert_eq!(result.kind(), "luz");
        assert_eq!(*service.calls.lock().unwrap(), vec!["image:image/jpeg"]);
    }

    #[tokio::test]
    async fn unreadable_pdf_skips_service() {
        let (extractor, service) = extractor(r#"{"tipo": "luz"}"#);
        let err = extractor
            .extract(b"%PDF-broken", "application/pdf")
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::PdfText(_) | ExtractionError::EmptyText));
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_mime() {
        let (extractor, _) = extractor("{}");
        let err = extractor.extract(b"PK", "application/zip").await.unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedMime(m) if m == "application/zip"));
    }

    #[tokio::test]
    async fn service_prose_without_json_is_failure() {
        let (extractor, _) = extractor("Lo siento, no puedo ayudar con eso.");
        let err = extractor.extract(&[1], "image/png").await.unwrap_err();
        assert!(matches!(err, ExtractionError::NoJson));
    }

    #[test]
    fn mime_parameters_are_dropped() {
        assert_eq!(base_mime("Application/PDF; charset=binary"), "application/pdf");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("añoñ", 2), "añ");
        assert_eq!(truncate_chars("luz", 10), "luz");
    }
}
