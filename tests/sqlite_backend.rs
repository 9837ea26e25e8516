//! Integration tests for the SQLite-backed store and vector index.
//!
//! Each test creates a fresh database under a temporary directory, runs
//! the schema migrations, and exercises the same trait surface the
//! pipeline uses in production.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use tempfile::TempDir;

use docsense::compose::Persona;
use docsense::config::{load_config, Config};
use docsense::db;
use docsense::embedding::Embedder;
use docsense::generation::Generator;
use docsense::index::{ChunkMetadata, IndexFilter, SqliteIndex, VectorIndex};
use docsense::migrate;
use docsense::models::{Chunk, FileType};
use docsense::pipeline;
use docsense::store::{MetadataStore, NewDocument, SqliteStore};

fn setup() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("docsense.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/data/docsense.sqlite\"\n\
             [chunking]\ntarget_chars = 200\noverlap_chars = 40\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    let config = load_config(&config_path).unwrap();
    (tmp, config)
}

fn chunk_meta(user_id: i64, document_id: i64, chunk_index: i64) -> ChunkMetadata {
    ChunkMetadata {
        source: "report.txt".to_string(),
        chunk_index,
        document_id,
        user_id,
        file_type: FileType::Text,
        content_hash: "hash".to_string(),
    }
}

struct MockEmbedder;

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = [0f32; 4];
                for (i, b) in t.bytes().enumerate() {
                    v[i % 4] += b as f32 / 255.0;
                }
                v.to_vec()
            })
            .collect())
    }
}

struct CannedGenerator;

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(&self, _system: &str, _prompt: &str, _temperature: f32) -> Result<String> {
        Ok("Answer from context.".to_string())
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (_tmp, config) = setup();
    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();
}

#[tokio::test]
async fn store_roundtrip_over_sqlite() {
    let (_tmp, config) = setup();
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    let store = SqliteStore::new(pool.clone());

    let user = store.get_or_create_user("a@example.com", None).await.unwrap();
    assert_eq!(
        user,
        store.get_or_create_user("a@example.com", None).await.unwrap()
    );

    let doc_id = store
        .insert_document(&NewDocument {
            filename: "report.txt",
            original_filename: "report.txt",
            byte_size: 42,
            file_type: FileType::Text,
            user_id: user,
            chunk_count: 2,
            metadata_json: "{}".to_string(),
        })
        .await
        .unwrap();
    store
        .insert_chunks(
            doc_id,
            &[
                Chunk::new(doc_id, 0, "first part".to_string()),
                Chunk::new(doc_id, 1, "second part".to_string()),
            ],
        )
        .await
        .unwrap();

    let docs = store.list_documents(user).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, doc_id);
    assert_eq!(docs[0].chunk_count, 2);
    assert!(docs[0].processed);

    let session = store.create_session(user, Some("Q3 review")).await.unwrap();
    store
        .append_message(session, "user", "how did Q3 go?", None, None)
        .await
        .unwrap();
    store
        .append_message(session, "assistant", "well", Some(0.8), Some(&[doc_id]))
        .await
        .unwrap();

    let history = store.chat_history(user, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "assistant");
    assert_eq!(history[0].session_name, "Q3 review");

    let sessions = store.recent_sessions(user, 10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].message_count, 2);

    let stats = store.user_stats(user).await.unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.total_messages, 2);
    assert!((stats.avg_confidence.unwrap() - 0.8).abs() < 1e-9);

    store.delete_document(doc_id).await.unwrap();
    assert!(store.list_documents(user).await.unwrap().is_empty());
    assert!(store.delete_document(doc_id).await.is_err());

    pool.close().await;
}

#[tokio::test]
async fn index_ranks_and_filters_over_sqlite() {
    let (_tmp, config) = setup();
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    let index = SqliteIndex::new(pool.clone());

    index
        .upsert("d1c0", &[1.0, 0.0, 0.0, 0.0], "exact", &chunk_meta(1, 1, 0))
        .await
        .unwrap();
    index
        .upsert("d1c1", &[0.7, 0.7, 0.0, 0.0], "diagonal", &chunk_meta(1, 1, 1))
        .await
        .unwrap();
    index
        .upsert("d9c0", &[1.0, 0.0, 0.0, 0.0], "other user", &chunk_meta(2, 9, 0))
        .await
        .unwrap();

    let matches = index
        .query(&[1.0, 0.0, 0.0, 0.0], 10, &IndexFilter::for_user(1))
        .await
        .unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].text, "exact");
    assert!(matches[0].distance < matches[1].distance);
    assert!(matches.iter().all(|m| m.metadata.user_id == 1));

    let removed = index.delete(&IndexFilter::for_document(1)).await.unwrap();
    assert_eq!(removed, 2);
    let rest = index
        .query(&[1.0, 0.0, 0.0, 0.0], 10, &IndexFilter::default())
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].metadata.document_id, 9);

    pool.close().await;
}

#[tokio::test]
async fn pipeline_runs_end_to_end_over_sqlite() {
    let (_tmp, config) = setup();
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    let store = SqliteStore::new(pool.clone());
    let index = SqliteIndex::new(pool.clone());

    let report = pipeline::ingest(
        &store,
        &index,
        &MockEmbedder,
        &config,
        "a@example.com",
        "notes.txt",
        "text/plain",
        b"Revenue grew every quarter. Costs stayed flat. The margin widened.",
    )
    .await
    .unwrap();
    assert_eq!(report.file_type, FileType::Text);
    assert!(report.chunk_count >= 1);

    let outcome = pipeline::answer(
        &store,
        &index,
        &MockEmbedder,
        &CannedGenerator,
        &config,
        "a@example.com",
        "How did revenue develop?",
        Persona::Plain,
        None,
    )
    .await
    .unwrap();
    assert_eq!(outcome.answer, "Answer from context.");
    assert!(!outcome.sources.is_empty());
    assert!(outcome.confidence > 0.0);

    let removed = pipeline::delete_document(&store, &index, report.document_id)
        .await
        .unwrap();
    assert_eq!(removed as usize, report.chunk_count);

    pool.close().await;
}
