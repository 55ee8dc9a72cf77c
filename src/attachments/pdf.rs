//! Embedded text extraction for PDF documents

use super::ExtractionError;

/// Extract the embedded text layer of a PDF
///
/// Parsing runs on the blocking pool; a panic inside the parser surfaces as
/// [`ExtractionError::PdfText`] rather than taking the worker down.
///
/// # Errors
///
/// Returns [`ExtractionError::PdfText`] if the document cannot be parsed and
/// [`ExtractionError::EmptyText`] if it has no text layer (e.g. a scan)
pub async fn extract_text(data: Vec<u8>) -> Result<String, ExtractionError> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
        .await
        .map_err(|e| ExtractionError::PdfText(format!("parser aborted: {e}")))?
        .map_err(|e| ExtractionError::PdfText(e.to_string()))?;

    let text = collapse_whitespace(&text);
    if text.is_empty() {
        return Err(ExtractionError::EmptyText);
    }

    Ok(text)
}

/// Collapse runs of blank lines and trailing spaces left by the text layer
fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
