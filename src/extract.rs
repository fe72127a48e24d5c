//! Text extraction from uploaded PDF bytes.
//!
//! The [`TextExtract`] trait is the capability seam between the state
//! machine and whichever extraction backend is configured. The local backend
//! parses with `pdf-extract`; a hosted document-AI backend would implement
//! the same trait.
//!
//! Extraction never panics and never returns "successful emptiness": an empty
//! buffer, a parser failure, and a whitespace-only result are three distinct
//! typed failures, so the state machine can record a meaningful error and a
//! scanned-image PDF is never mistaken for a processed one.

use crate::config::ExtractorConfig;
use anyhow::Result;

/// Extraction failure, carried onto the document row as `extraction_error`.
#[derive(Debug)]
pub enum ExtractError {
    /// Zero-byte input; no parse was attempted.
    EmptyFile,
    /// The parser accepted the file but produced no usable text
    /// (image-only/scanned PDF).
    NoText,
    /// The parser rejected the file (corrupt or encrypted).
    Parse(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::EmptyFile => write!(f, "PDF file is empty"),
            ExtractError::NoText => write!(
                f,
                "no text could be extracted; the PDF may be image-only (scanned) or damaged"
            ),
            ExtractError::Parse(e) => write!(f, "PDF parsing failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Capability interface for text-extraction backends.
pub trait TextExtract: Send + Sync {
    /// Extract plain text from raw PDF bytes. On success the text is used
    /// verbatim downstream, with no trimming that would lose table structure.
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Local backend: in-process parsing via `pdf-extract`.
pub struct PdfTextExtractor;

impl TextExtract for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::EmptyFile);
        }

        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Parse(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(ExtractError::NoText);
        }

        Ok(text)
    }
}

/// Instantiate the configured extraction backend.
pub fn create_extractor(config: &ExtractorConfig) -> Result<Box<dyn TextExtract>> {
    match config.backend.as_str() {
        "local" => Ok(Box::new(PdfTextExtractor)),
        other => anyhow::bail!("Unknown extractor backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_fails_without_parsing() {
        let err = PdfTextExtractor.extract(b"").unwrap_err();
        assert!(matches!(err, ExtractError::EmptyFile));
    }

    #[test]
    fn invalid_pdf_returns_parse_error() {
        let err = PdfTextExtractor.extract(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = ExtractorConfig {
            backend: "hosted-ocr".to_string(),
        };
        assert!(create_extractor(&config).is_err());
    }
}
