//! Prompt templates for contextual chunk enrichment.
//!
//! A template is picked from the document's content type (and, for markdown and plain text,
//! a quick look at its content). Binary content types cannot be contextualized, so prompt
//! construction fails for them and the chunk is recorded as failed.

use crate::generation::GenerationRequest;
use thiserror::Error;

const SYSTEM_PROMPT: &str = "You write short retrieval context for excerpts of a larger document. \
Answer with the context only, without preamble.";

const BINARY_PREFIXES: [&str; 4] = ["image/", "audio/", "video/", "font/"];
const BINARY_TYPES: [&str; 3] = [
    "application/octet-stream",
    "application/zip",
    "application/x-binary",
];
const CODE_TYPES: [&str; 8] = [
    "application/javascript",
    "application/typescript",
    "application/x-python",
    "application/x-sh",
    "application/json",
    "application/xml",
    "text/javascript",
    "text/css",
];
const MATH_MARKERS: [&str; 6] = [
    "$$",
    "\\begin{equation",
    "\\frac",
    "\\sum",
    "\\int",
    "\\mathbb",
];
const TECHNICAL_MARKERS: [&str; 6] = ["```", "api", "endpoint", "parameter", "install", "config"];

/// How the document reaches the text-generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStrategy {
    /// Document sent as a separate cacheable block, followed by a chunk-only instruction.
    Cached,
    /// Document and chunk inlined in one prompt.
    Standard,
}

/// Document families with dedicated prompt wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Source code or structured data.
    Code,
    /// Text extracted from a PDF.
    Pdf,
    /// Mathematical or scientific notation.
    Math,
    /// Technical documentation.
    Technical,
    /// Anything else that is text.
    General,
}

/// Length bounds requested for one generated context, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextTarget {
    /// Lower bound.
    pub min_tokens: u32,
    /// Upper bound.
    pub max_tokens: u32,
}

/// Prompt construction failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    /// The document has no text to situate the chunk in.
    #[error("document text is empty")]
    EmptyDocument,
    /// The chunk has no text.
    #[error("chunk text is empty")]
    EmptyChunk,
    /// The content type is binary.
    #[error("content type {0} cannot be contextualized")]
    UnsupportedContentType(String),
}

impl DocumentKind {
    /// Classify a document by content type and, when the type is generic, by content.
    pub fn detect(content_type: &str, filename: &str, text: &str) -> Result<Self, PromptError> {
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if BINARY_PREFIXES
            .iter()
            .any(|prefix| content_type.starts_with(prefix))
            || BINARY_TYPES.contains(&content_type.as_str())
        {
            return Err(PromptError::UnsupportedContentType(content_type));
        }

        if content_type == "application/pdf" {
            return Ok(Self::Pdf);
        }
        if content_type.starts_with("text/x-")
            || CODE_TYPES.contains(&content_type.as_str())
            || is_code_filename(filename)
        {
            return Ok(Self::Code);
        }

        let sample: String = text.chars().take(4_000).collect::<String>().to_lowercase();
        if MATH_MARKERS
            .iter()
            .filter(|marker| sample.contains(*marker))
            .count()
            >= 2
        {
            return Ok(Self::Math);
        }
        if content_type == "text/markdown"
            && TECHNICAL_MARKERS
                .iter()
                .filter(|marker| sample.contains(*marker))
                .count()
                >= 2
        {
            return Ok(Self::Technical);
        }
        Ok(Self::General)
    }

    /// Context length bounds for this kind.
    pub fn target(self) -> ContextTarget {
        let (min_tokens, max_tokens) = match self {
            Self::Code => (100, 200),
            Self::Pdf => (80, 150),
            Self::Math => (100, 200),
            Self::Technical => (80, 160),
            Self::General => (60, 120),
        };
        ContextTarget {
            min_tokens,
            max_tokens,
        }
    }

    fn focus(self) -> &'static str {
        match self {
            Self::Code => {
                "The document is source code. Name the module, type, or function the chunk \
                 belongs to and what it is responsible for.\n"
            }
            Self::Pdf => {
                "The document text was extracted from a PDF. Ignore page headers, footers and \
                 extraction artifacts.\n"
            }
            Self::Math => {
                "The chunk contains mathematical notation. Name the definitions or results it \
                 works with.\n"
            }
            Self::Technical => {
                "The document is technical documentation. Name the feature or procedure the \
                 chunk describes.\n"
            }
            Self::General => "",
        }
    }
}

fn is_code_filename(filename: &str) -> bool {
    const EXTENSIONS: [&str; 14] = [
        "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "cpp", "h", "rb", "sh", "toml",
    ];
    filename
        .rsplit_once('.')
        .map(|(_, extension)| EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn instruction(kind: DocumentKind, chunk: &str) -> String {
    let target = kind.target();
    format!(
        "Here is a chunk from the document:\n<chunk>\n{chunk}\n</chunk>\n\n{focus}\
         Write a context of {min} to {max} tokens that situates this chunk within the overall \
         document to improve search retrieval of the chunk. Mention the document's subject and \
         the part of the document the chunk comes from.",
        focus = kind.focus(),
        min = target.min_tokens,
        max = target.max_tokens,
    )
}

fn wrap_document(document: &str) -> String {
    format!("<document>\n{document}\n</document>")
}

/// Build the generation request that asks for a chunk's context.
pub fn build_context_request(
    strategy: PromptStrategy,
    content_type: &str,
    filename: &str,
    document: &str,
    chunk: &str,
) -> Result<GenerationRequest, PromptError> {
    if document.trim().is_empty() {
        return Err(PromptError::EmptyDocument);
    }
    if chunk.trim().is_empty() {
        return Err(PromptError::EmptyChunk);
    }
    let kind = DocumentKind::detect(content_type, filename, document)?;
    let max_tokens = kind.target().max_tokens * 2;

    let request = match strategy {
        PromptStrategy::Cached => GenerationRequest {
            prompt: instruction(kind, chunk),
            system: Some(SYSTEM_PROMPT.to_string()),
            max_tokens,
            cached_document: Some(wrap_document(document)),
        },
        PromptStrategy::Standard => GenerationRequest {
            prompt: format!("{}\n\n{}", wrap_document(document), instruction(kind, chunk)),
            system: Some(SYSTEM_PROMPT.to_string()),
            max_tokens,
            cached_document: None,
        },
    };
    Ok(request)
}

/// Merge a generated context with its chunk; an empty context leaves the chunk unchanged.
pub fn chunk_with_context(chunk: &str, context: &str) -> String {
    let context = context.trim();
    if context.is_empty() {
        chunk.to_string()
    } else {
        format!("{context}\n\n{chunk}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_types_are_rejected() {
        for content_type in ["image/png", "application/octet-stream", "video/mp4"] {
            let error = build_context_request(
                PromptStrategy::Standard,
                content_type,
                "file.bin",
                "doc",
                "chunk",
            )
            .unwrap_err();
            assert!(matches!(error, PromptError::UnsupportedContentType(_)));
        }
    }

    #[test]
    fn empty_inputs_fail() {
        assert_eq!(
            build_context_request(PromptStrategy::Standard, "text/plain", "a", " ", "chunk"),
            Err(PromptError::EmptyDocument)
        );
        assert_eq!(
            build_context_request(PromptStrategy::Standard, "text/plain", "a", "doc", ""),
            Err(PromptError::EmptyChunk)
        );
    }

    #[test]
    fn kinds_are_detected() {
        assert_eq!(
            DocumentKind::detect("application/pdf", "a.pdf", "text"),
            Ok(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::detect("text/plain", "lib.rs", "fn main() {}"),
            Ok(DocumentKind::Code)
        );
        assert_eq!(
            DocumentKind::detect("text/plain", "notes.txt", "$$ x = \\frac{1}{2} $$"),
            Ok(DocumentKind::Math)
        );
        assert_eq!(
            DocumentKind::detect(
                "text/markdown",
                "guide.md",
                "# Install\nSet the config parameter.\n```sh\nrun\n```"
            ),
            Ok(DocumentKind::Technical)
        );
        assert_eq!(
            DocumentKind::detect("text/plain", "story.txt", "Once upon a time"),
            Ok(DocumentKind::General)
        );
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(
            DocumentKind::detect("application/pdf; version=1.7", "a", "text"),
            Ok(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::detect("Application/JSON; charset=utf-8", "data", "{}"),
            Ok(DocumentKind::Code)
        );
        assert!(matches!(
            DocumentKind::detect("image/png; q=0.9", "a", "x"),
            Err(PromptError::UnsupportedContentType(content_type)) if content_type == "image/png"
        ));
    }

    #[test]
    fn cached_strategy_separates_document() {
        let request = build_context_request(
            PromptStrategy::Cached,
            "text/plain",
            "a.txt",
            "Full document",
            "A chunk",
        )
        .unwrap();
        assert_eq!(
            request.cached_document.as_deref(),
            Some("<document>\nFull document\n</document>")
        );
        assert!(!request.prompt.contains("Full document"));
        assert!(request.prompt.contains("A chunk"));
        assert_eq!(request.max_tokens, 240);
    }

    #[test]
    fn standard_strategy_inlines_document() {
        let request = build_context_request(
            PromptStrategy::Standard,
            "text/plain",
            "a.txt",
            "Full document",
            "A chunk",
        )
        .unwrap();
        assert!(request.cached_document.is_none());
        assert!(request.prompt.starts_with("<document>\nFull document"));
        assert!(request.prompt.contains("<chunk>\nA chunk\n</chunk>"));
    }

    #[test]
    fn chunk_with_context_prepends_context() {
        assert_eq!(chunk_with_context("body", " ctx "), "ctx\n\nbody");
        assert_eq!(chunk_with_context("body", "  "), "body");
    }
}
