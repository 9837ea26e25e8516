//! Core data models used throughout Docsense.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and question-answering pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Detected document category, recorded at extraction time.
///
/// The string form of this tag is part of the metadata contract: it is
/// written into the vector index per chunk and consumed downstream for
/// chunk sizing and source labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Plain text or markdown.
    Text,
    /// Spreadsheet workbook routed through the tabular analyzer.
    Tabular,
    /// Page-oriented document (PDF).
    Paged,
    /// Unrecognized extension/content type.
    Unsupported,
}

impl FileType {
    /// Stable tag written into stored metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Text => "text",
            FileType::Tabular => "tabular",
            FileType::Paged => "paged",
            FileType::Unsupported => "unsupported",
        }
    }

    /// Human-readable label used when assembling answer context.
    pub fn source_label(&self) -> &'static str {
        match self {
            FileType::Text => "text file",
            FileType::Tabular => "spreadsheet analysis",
            FileType::Paged => "document",
            FileType::Unsupported => "unsupported file",
        }
    }

    /// Parse a stored tag back into the enum. Unknown tags map to
    /// [`FileType::Unsupported`] rather than failing, so a stale index
    /// entry can still be rendered.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "text" => FileType::Text,
            "tabular" => FileType::Tabular,
            "paged" => FileType::Paged,
            _ => FileType::Unsupported,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered fragment of a document's extracted text.
///
/// Chunks are created once at ingestion time and never mutated; they are
/// deleted only when the owning document is deleted.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub document_id: i64,
    /// Zero-based position within the document.
    pub index: i64,
    pub text: String,
    /// SHA-256 of the text, used for staleness detection in the index.
    pub hash: String,
}

impl Chunk {
    pub fn new(document_id: i64, index: i64, text: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Self {
            document_id,
            index,
            text,
            hash,
        }
    }

    /// Character length (not byte length) of the chunk text.
    pub fn char_len(&self) -> i64 {
        self.text.chars().count() as i64
    }
}

/// Provenance for one retrieved chunk, produced fresh per query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedSource {
    /// Originating filename.
    pub source: String,
    pub chunk_index: i64,
    pub document_id: i64,
    /// Similarity in `[0.0, 1.0]`, derived from vector distance.
    pub similarity: f64,
    pub file_type: FileType,
    pub content_preview: String,
}

/// Result of a completed ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: i64,
    pub chunk_count: usize,
    pub file_type: FileType,
    /// Which analysis tier ran for tabular inputs (`advanced` or `basic`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// Result of answering one question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<RetrievedSource>,
    /// Mean similarity across the sources fed into the prompt.
    pub confidence: f64,
    pub session_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_tag_roundtrip() {
        for ft in [
            FileType::Text,
            FileType::Tabular,
            FileType::Paged,
            FileType::Unsupported,
        ] {
            assert_eq!(FileType::from_tag(ft.as_str()), ft);
        }
        assert_eq!(FileType::from_tag("excel"), FileType::Unsupported);
    }

    #[test]
    fn chunk_hash_is_deterministic() {
        let a = Chunk::new(1, 0, "same text".to_string());
        let b = Chunk::new(2, 5, "same text".to_string());
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.char_len(), 9);
    }

    #[test]
    fn char_len_counts_characters_not_bytes() {
        let c = Chunk::new(1, 0, "liikevaihtoä".to_string());
        assert_eq!(c.char_len(), 12);
        assert!(c.text.len() > 12);
    }
}
