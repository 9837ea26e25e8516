//! Ingestion and question-answering orchestration.
//!
//! Coordinates the full flows over the collaborator traits: extraction →
//! segmentation → embedding → storage for uploads, and validation →
//! embedding → retrieval → composition → persistence for questions.
//! Collaborator failures propagate unchanged; inputs are validated
//! before any collaborator is called.

use anyhow::{Context, Result};
use tracing::info;

use crate::compose::{self, Persona};
use crate::config::Config;
use crate::embedding::{embed_one, Embedder};
use crate::extract::Extractor;
use crate::generation::Generator;
use crate::index::{ChunkMetadata, IndexFilter, VectorIndex};
use crate::models::{Chunk, FileType, IngestReport, QueryOutcome};
use crate::retrieve::retrieve;
use crate::segment::segment;
use crate::store::{MetadataStore, NewDocument};

/// Fixed answer when retrieval finds nothing; returned with confidence
/// 0.0 and without invoking the generation service.
pub const NO_DOCUMENTS_ANSWER: &str = "No relevant documents found for your query.";

/// Pipeline-level failures, distinguishable from collaborator errors.
#[derive(Debug)]
pub enum PipelineError {
    /// Input rejected before any collaborator call.
    Validation(String),
    /// Unrecognized file extension/content type.
    Unsupported(String),
    /// The file bytes could not be read or parsed.
    Extraction(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Validation(msg)
            | PipelineError::Unsupported(msg)
            | PipelineError::Extraction(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Ingest one uploaded file for a user.
///
/// Embeddings for all chunks are generated before anything is persisted:
/// a failed embedding call fails the whole ingestion with no partial
/// writes. Chunk vectors are stored under ids `doc_{id}_chunk_{index}`
/// so index entries can be deleted per document later.
#[allow(clippy::too_many_arguments)]
pub async fn ingest(
    store: &dyn MetadataStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    config: &Config,
    user_email: &str,
    filename: &str,
    content_type: &str,
    content: &[u8],
) -> Result<IngestReport> {
    if filename.trim().is_empty() {
        return Err(PipelineError::Validation("filename must not be empty".to_string()).into());
    }
    if content.is_empty() {
        return Err(PipelineError::Validation("uploaded file is empty".to_string()).into());
    }

    let user_id = store.get_or_create_user(user_email, None).await?;

    let extractor = Extractor::new(config.extraction.advanced_tabular);
    let extraction = extractor.extract(content, filename, content_type);

    if extraction.file_type == FileType::Unsupported {
        let reason = extraction
            .error()
            .unwrap_or("unsupported file type")
            .to_string();
        return Err(PipelineError::Unsupported(reason).into());
    }
    if let Some(reason) = extraction.error() {
        return Err(PipelineError::Extraction(reason.to_string()).into());
    }

    let (target, overlap) = config.chunking_for(extraction.file_type);
    let texts = segment(&extraction.text, target, overlap);

    // Embed before persisting: a failed call must not leave a document
    // row without its vectors.
    let vectors = if texts.is_empty() {
        Vec::new()
    } else {
        embedder
            .embed(&texts)
            .await
            .context("embedding generation failed")?
    };
    if vectors.len() != texts.len() {
        anyhow::bail!(
            "embedding service returned {} vectors for {} chunks",
            vectors.len(),
            texts.len()
        );
    }

    let document_id = store
        .insert_document(&NewDocument {
            filename,
            original_filename: filename,
            byte_size: content.len() as i64,
            file_type: extraction.file_type,
            user_id,
            chunk_count: texts.len() as i64,
            metadata_json: extraction.metadata.to_string(),
        })
        .await?;

    let chunks: Vec<Chunk> = texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk::new(document_id, i as i64, text))
        .collect();
    store.insert_chunks(document_id, &chunks).await?;

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        let id = format!("doc_{}_chunk_{}", document_id, chunk.index);
        index
            .upsert(
                &id,
                vector,
                &chunk.text,
                &ChunkMetadata {
                    source: filename.to_string(),
                    chunk_index: chunk.index,
                    document_id,
                    user_id,
                    file_type: extraction.file_type,
                    content_hash: chunk.hash.clone(),
                },
            )
            .await?;
    }

    info!(
        document_id,
        chunks = chunks.len(),
        file_type = %extraction.file_type,
        "document ingested"
    );

    Ok(IngestReport {
        document_id,
        chunk_count: chunks.len(),
        file_type: extraction.file_type,
        analysis: extraction.analysis_tier().map(|t| t.to_string()),
    })
}

/// Answer a question against the user's own documents.
///
/// An empty retrieval is a valid outcome: the fixed
/// [`NO_DOCUMENTS_ANSWER`] is stored and returned with confidence 0.0,
/// and the generation service is not called.
#[allow(clippy::too_many_arguments)]
pub async fn answer(
    store: &dyn MetadataStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    config: &Config,
    user_email: &str,
    question: &str,
    persona: Persona,
    session_id: Option<i64>,
) -> Result<QueryOutcome> {
    if question.trim().is_empty() {
        return Err(PipelineError::Validation("question must not be empty".to_string()).into());
    }

    let user_id = store.get_or_create_user(user_email, None).await?;
    let session_id = match session_id {
        Some(id) => id,
        None => store.create_session(user_id, None).await?,
    };

    store
        .append_message(session_id, "user", question, None, None)
        .await?;

    let question_vec = embed_one(embedder, question).await?;
    let retrieval = retrieve(index, &question_vec, user_id, config.retrieval.max_results).await?;

    let (answer_text, confidence, sources) = if retrieval.is_empty() {
        (NO_DOCUMENTS_ANSWER.to_string(), 0.0, Vec::new())
    } else {
        let composed = compose::compose(
            generator,
            question,
            &retrieval.context,
            &retrieval.sources,
            persona,
        )
        .await?;
        (composed.answer, composed.confidence, retrieval.sources)
    };

    let mut source_docs: Vec<i64> = sources.iter().map(|s| s.document_id).collect();
    source_docs.sort_unstable();
    source_docs.dedup();

    store
        .append_message(
            session_id,
            "assistant",
            &answer_text,
            Some(confidence),
            if source_docs.is_empty() {
                None
            } else {
                Some(&source_docs)
            },
        )
        .await?;

    info!(
        session_id,
        sources = sources.len(),
        confidence,
        persona = persona.as_str(),
        "question answered"
    );

    Ok(QueryOutcome {
        answer: answer_text,
        sources,
        confidence,
        session_id,
    })
}

/// Delete a document from both stores; returns the number of index
/// entries removed. The two deletes are independent calls, so a crash
/// in between leaves at most orphaned index entries for a missing
/// document.
pub async fn delete_document(
    store: &dyn MetadataStore,
    index: &dyn VectorIndex,
    document_id: i64,
) -> Result<u64> {
    store.delete_document(document_id).await?;
    let removed = index.delete(&IndexFilter::for_document(document_id)).await?;
    info!(document_id, removed, "document deleted");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::generation::DisabledGenerator;
    use crate::index::MemoryIndex;
    use crate::store::MemoryStore;

    fn test_config() -> Config {
        toml::from_str("[db]\npath = \"./unused.sqlite\"\n").unwrap()
    }

    // The disabled collaborators error when invoked, so these tests also
    // prove validation happens before any collaborator call.

    #[tokio::test]
    async fn empty_question_is_rejected_before_collaborators() {
        let store = MemoryStore::new();
        let index = MemoryIndex::new();
        let err = answer(
            &store,
            &index,
            &DisabledEmbedder,
            &DisabledGenerator,
            &test_config(),
            "a@example.com",
            "   ",
            Persona::Plain,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn empty_file_is_rejected_before_collaborators() {
        let store = MemoryStore::new();
        let index = MemoryIndex::new();
        let err = ingest(
            &store,
            &index,
            &DisabledEmbedder,
            &test_config(),
            "a@example.com",
            "notes.txt",
            "text/plain",
            b"",
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Validation(_))
        ));
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn unsupported_type_is_a_distinct_error() {
        let store = MemoryStore::new();
        let index = MemoryIndex::new();
        let err = ingest(
            &store,
            &index,
            &DisabledEmbedder,
            &test_config(),
            "a@example.com",
            "binary.exe",
            "application/octet-stream",
            b"MZ",
        )
        .await
        .unwrap_err();

        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Unsupported(msg)) => assert!(msg.contains("exe")),
            other => panic!("expected unsupported error, got {:?}", other),
        }
        assert_eq!(store.document_count(), 0);
        assert!(index.is_empty());
    }
}
