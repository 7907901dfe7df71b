//! Turn uploaded bytes into document text.

use async_trait::async_trait;
use thiserror::Error;

const TEXTUAL_TYPES: [&str; 8] = [
    "application/json",
    "application/xml",
    "application/javascript",
    "application/typescript",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/x-sh",
];

/// Reasons a document's text could not be extracted.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// No extractor handles this content type.
    #[error("unsupported content type {content_type} for {filename}")]
    UnsupportedContentType {
        /// Declared MIME type.
        content_type: String,
        /// Submitted filename.
        filename: String,
    },
    /// The bytes are not valid UTF-8.
    #[error("{filename} is not valid UTF-8 text")]
    InvalidEncoding {
        /// Submitted filename.
        filename: String,
    },
}

/// Extracts plain text from a submitted document.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the text of `content`.
    async fn extract(
        &self,
        content: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, ExtractionError>;
}

/// Extractor for UTF-8 text formats; binary formats are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    /// Whether `content_type` is a text format this extractor reads.
    pub fn supports(content_type: &str) -> bool {
        let normalized = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        normalized.starts_with("text/") || TEXTUAL_TYPES.contains(&normalized.as_str())
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(
        &self,
        content: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, ExtractionError> {
        if !Self::supports(content_type) {
            return Err(ExtractionError::UnsupportedContentType {
                content_type: content_type.to_string(),
                filename: filename.to_string(),
            });
        }
        let text = std::str::from_utf8(content).map_err(|_| ExtractionError::InvalidEncoding {
            filename: filename.to_string(),
        })?;
        Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_types_are_decoded() {
        let text = PlainTextExtractor
            .extract("\u{feff}héllo".as_bytes(), "text/plain; charset=utf-8", "a.txt")
            .await
            .expect("text");
        assert_eq!(text, "héllo");
    }

    #[tokio::test]
    async fn binary_types_are_rejected() {
        let error = PlainTextExtractor
            .extract(&[0x89, 0x50], "image/png", "a.png")
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractionError::UnsupportedContentType { .. }));
    }

    #[tokio::test]
    async fn invalid_utf8_is_reported() {
        let error = PlainTextExtractor
            .extract(&[0xff, 0xfe, 0x00], "text/plain", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractionError::InvalidEncoding { .. }));
    }

    #[test]
    fn json_is_textual() {
        assert!(PlainTextExtractor::supports("application/json"));
        assert!(!PlainTextExtractor::supports("application/pdf"));
    }
}
