//! Retrieval and ranking over the vector index.
//!
//! Converts a question embedding into a ranked list of
//! [`RetrievedSource`]s restricted to one user's chunks, and assembles
//! the bounded context text fed to the answer composer. Index order
//! (closest first) is preserved throughout.

use anyhow::Result;

use crate::index::{IndexFilter, VectorIndex};
use crate::models::RetrievedSource;

/// Separator between context entries.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Characters of chunk text kept in each source preview.
const PREVIEW_CHARS: usize = 100;

/// Ranked sources plus the concatenated context text.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub sources: Vec<RetrievedSource>,
    pub context: String,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Convert an index distance to a similarity score in `[0.0, 1.0]`.
///
/// Assumes cosine-distance space (`d` in `[0, 2]`): `similarity = 1 - d`,
/// clamped so far-away matches score 0 instead of going negative. If the
/// index is ever reconfigured to another metric (e.g. dot product), this
/// is the one place to revisit.
pub fn similarity_from_distance(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Query the index for the `k` chunks closest to `question_vec`, scoped
/// to `user_id`, and build the context window.
///
/// An empty result is a valid outcome: the caller must substitute the
/// fixed no-documents answer instead of invoking generation.
pub async fn retrieve(
    index: &dyn VectorIndex,
    question_vec: &[f32],
    user_id: i64,
    k: usize,
) -> Result<Retrieval> {
    let matches = index
        .query(question_vec, k, &IndexFilter::for_user(user_id))
        .await?;

    let mut sources = Vec::with_capacity(matches.len());
    let mut entries = Vec::with_capacity(matches.len());

    for m in &matches {
        let preview: String = m.text.chars().take(PREVIEW_CHARS).collect();
        let preview = if m.text.chars().count() > PREVIEW_CHARS {
            format!("{}...", preview)
        } else {
            preview
        };

        sources.push(RetrievedSource {
            source: m.metadata.source.clone(),
            chunk_index: m.metadata.chunk_index,
            document_id: m.metadata.document_id,
            similarity: similarity_from_distance(m.distance),
            file_type: m.metadata.file_type,
            content_preview: preview,
        });

        entries.push(format!(
            "[{}] {}\n{}",
            m.metadata.file_type.source_label(),
            m.metadata.source,
            m.text
        ));
    }

    Ok(Retrieval {
        sources,
        context: entries.join(CONTEXT_SEPARATOR),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ChunkMetadata, MemoryIndex};
    use crate::models::FileType;

    fn meta(user_id: i64, document_id: i64, index: i64, file_type: FileType) -> ChunkMetadata {
        ChunkMetadata {
            source: format!("doc{}.txt", document_id),
            chunk_index: index,
            document_id,
            user_id,
            file_type,
            content_hash: String::new(),
        }
    }

    #[test]
    fn similarity_is_clamped() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert!((similarity_from_distance(0.3) - 0.7).abs() < 1e-12);
        assert_eq!(similarity_from_distance(1.0), 0.0);
        assert_eq!(similarity_from_distance(1.7), 0.0);
        assert_eq!(similarity_from_distance(-0.01), 1.0);
    }

    #[tokio::test]
    async fn retrieval_preserves_index_order_and_labels_sources() {
        let index = MemoryIndex::new();
        index
            .upsert("a", &[1.0, 0.0], "closest chunk", &meta(1, 1, 0, FileType::Text))
            .await
            .unwrap();
        index
            .upsert(
                "b",
                &[0.6, 0.8],
                "farther chunk",
                &meta(1, 2, 3, FileType::Tabular),
            )
            .await
            .unwrap();

        let retrieval = retrieve(&index, &[1.0, 0.0], 1, 5).await.unwrap();
        assert_eq!(retrieval.sources.len(), 2);
        assert!(retrieval.sources[0].similarity > retrieval.sources[1].similarity);
        assert_eq!(retrieval.sources[0].source, "doc1.txt");
        assert_eq!(retrieval.sources[1].chunk_index, 3);

        let first = retrieval.context.split(CONTEXT_SEPARATOR).next().unwrap();
        assert!(first.starts_with("[text file] doc1.txt"));
        assert!(retrieval.context.contains("[spreadsheet analysis] doc2.txt"));
    }

    #[tokio::test]
    async fn retrieval_is_scoped_to_the_requesting_user() {
        let index = MemoryIndex::new();
        index
            .upsert("theirs", &[1.0, 0.0], "not yours", &meta(2, 9, 0, FileType::Text))
            .await
            .unwrap();

        let retrieval = retrieve(&index, &[1.0, 0.0], 1, 5).await.unwrap();
        assert!(retrieval.is_empty());
        assert!(retrieval.context.is_empty());
    }

    #[tokio::test]
    async fn long_chunks_get_elided_previews() {
        let index = MemoryIndex::new();
        let long_text = "x".repeat(250);
        index
            .upsert("a", &[1.0, 0.0], &long_text, &meta(1, 1, 0, FileType::Text))
            .await
            .unwrap();

        let retrieval = retrieve(&index, &[1.0, 0.0], 1, 5).await.unwrap();
        let preview = &retrieval.sources[0].content_preview;
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
    }
}
