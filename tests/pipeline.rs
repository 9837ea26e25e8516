//! End-to-end pipeline tests over in-memory collaborators.
//!
//! The store and vector index are the in-memory implementations; the
//! embedding and generation services are deterministic mocks, so every
//! scenario exercises the real ingestion/answering flows without
//! network access.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use docsense::compose::Persona;
use docsense::config::Config;
use docsense::embedding::Embedder;
use docsense::generation::Generator;
use docsense::index::MemoryIndex;
use docsense::models::FileType;
use docsense::pipeline::{self, PipelineError, NO_DOCUMENTS_ANSWER};
use docsense::store::{MemoryStore, MetadataStore};

fn test_config() -> Config {
    toml::from_str(
        "[db]\npath = \"./unused.sqlite\"\n\
         [chunking]\ntarget_chars = 200\noverlap_chars = 40\n",
    )
    .unwrap()
}

/// Deterministic text-derived vectors: identical text embeds identically.
struct MockEmbedder;

fn embed_text(text: &str) -> Vec<f32> {
    let mut v = [0f32; 8];
    for (i, b) in text.bytes().enumerate() {
        v[i % 8] += b as f32 / 255.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v.to_vec()
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// Embedder that always fails, for partial-ingestion tests.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unavailable")
    }
}

/// Generator returning a canned answer and counting invocations.
#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
}

impl CountingGenerator {
    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for CountingGenerator {
    async fn generate(&self, _system: &str, _prompt: &str, _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("The revenue grew across the period.".to_string())
    }
}

/// Minimal xlsx with one sheet, shared-string labels in column A and
/// numbers in column B.
fn minimal_xlsx(sheet_name: &str, headers: [&str; 2], rows: &[(&str, f64)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();

        let mut strings: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
        for (label, _) in rows {
            strings.push(label.to_string());
        }
        let sst: String = strings
            .iter()
            .map(|s| format!("<si><t>{}</t></si>", s))
            .collect();
        zip.start_file("xl/sharedStrings.xml", opts).unwrap();
        zip.write_all(format!("<?xml version=\"1.0\"?><sst>{}</sst>", sst).as_bytes())
            .unwrap();

        zip.start_file("xl/workbook.xml", opts).unwrap();
        zip.write_all(
            format!(
                "<?xml version=\"1.0\"?><workbook><sheets><sheet name=\"{}\" sheetId=\"1\"/></sheets></workbook>",
                sheet_name
            )
            .as_bytes(),
        )
        .unwrap();

        let mut sheet = String::from("<?xml version=\"1.0\"?><worksheet><sheetData>");
        sheet.push_str(
            "<row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c></row>",
        );
        for (i, (_, value)) in rows.iter().enumerate() {
            sheet.push_str(&format!(
                "<row r=\"{r}\"><c r=\"A{r}\" t=\"s\"><v>{s}</v></c><c r=\"B{r}\"><v>{v}</v></c></row>",
                r = i + 2,
                s = 2 + i,
                v = value
            ));
        }
        sheet.push_str("</sheetData></worksheet>");
        zip.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
        zip.write_all(sheet.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

const TEXT_BODY: &str = "Quarterly revenue grew steadily through the year. \
The first quarter closed at one hundred units. The second quarter closed at \
one hundred and fifty units. The third quarter closed at two hundred and \
twenty five units. Costs stayed flat over the same period, so the operating \
margin widened each quarter. The board considered the trend sustainable.";

#[tokio::test]
async fn ingest_then_query_roundtrip() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let config = test_config();

    let report = pipeline::ingest(
        &store,
        &index,
        &MockEmbedder,
        &config,
        "alice@example.com",
        "report.txt",
        "text/plain",
        TEXT_BODY.as_bytes(),
    )
    .await
    .unwrap();

    assert_eq!(report.file_type, FileType::Text);
    assert!(report.chunk_count >= 2, "body should span several chunks");
    assert_eq!(store.document_count(), 1);
    assert_eq!(store.chunk_count(), report.chunk_count);
    assert_eq!(index.len(), report.chunk_count);

    let generator = CountingGenerator::default();
    let outcome = pipeline::answer(
        &store,
        &index,
        &MockEmbedder,
        &generator,
        &config,
        "alice@example.com",
        "How did revenue develop?",
        Persona::Analytical,
        None,
    )
    .await
    .unwrap();

    assert_eq!(generator.call_count(), 1);
    assert_eq!(outcome.answer, "The revenue grew across the period.");
    assert!(!outcome.sources.is_empty());
    assert!(outcome.confidence > 0.0 && outcome.confidence <= 1.0);
    for source in &outcome.sources {
        assert_eq!(source.source, "report.txt");
        assert!((0.0..=1.0).contains(&source.similarity));
    }

    // Both sides of the exchange are persisted, with confidence on the
    // assistant message only.
    let messages = store.messages_for_session(outcome.session_id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0, "user");
    assert_eq!(messages[0].2, None);
    assert_eq!(messages[1].0, "assistant");
    assert!((messages[1].2.unwrap() - outcome.confidence).abs() < 1e-9);
}

#[tokio::test]
async fn empty_retrieval_skips_generation() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let generator = CountingGenerator::default();

    let outcome = pipeline::answer(
        &store,
        &index,
        &MockEmbedder,
        &generator,
        &test_config(),
        "alice@example.com",
        "Anything in my documents?",
        Persona::Plain,
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.answer, NO_DOCUMENTS_ANSWER);
    assert_eq!(outcome.confidence, 0.0);
    assert!(outcome.sources.is_empty());
    assert_eq!(generator.call_count(), 0, "generation must not be called");
}

#[tokio::test]
async fn queries_never_cross_user_boundaries() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let config = test_config();

    pipeline::ingest(
        &store,
        &index,
        &MockEmbedder,
        &config,
        "alice@example.com",
        "alice-notes.txt",
        "text/plain",
        TEXT_BODY.as_bytes(),
    )
    .await
    .unwrap();

    let generator = CountingGenerator::default();
    // Same question text, so the query vector is maximally close to
    // Alice's chunks; Bob must still see nothing.
    let outcome = pipeline::answer(
        &store,
        &index,
        &MockEmbedder,
        &generator,
        &config,
        "bob@example.com",
        "How did revenue develop?",
        Persona::Plain,
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.answer, NO_DOCUMENTS_ANSWER);
    assert!(outcome.sources.is_empty());
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn spreadsheet_ingestion_runs_advanced_analysis() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let config = test_config();

    let workbook = minimal_xlsx(
        "Quarters",
        ["Quarter", "Liikevaihto"],
        &[("Q1", 100.0), ("Q2", 150.0), ("Q3", 225.0)],
    );

    let report = pipeline::ingest(
        &store,
        &index,
        &MockEmbedder,
        &config,
        "alice@example.com",
        "results.xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        &workbook,
    )
    .await
    .unwrap();

    assert_eq!(report.file_type, FileType::Tabular);
    assert_eq!(report.analysis.as_deref(), Some("advanced"));
    assert!(report.chunk_count >= 1);

    let generator = CountingGenerator::default();
    let outcome = pipeline::answer(
        &store,
        &index,
        &MockEmbedder,
        &generator,
        &config,
        "alice@example.com",
        "What was the revenue trend?",
        Persona::Executive,
        None,
    )
    .await
    .unwrap();

    assert!(!outcome.sources.is_empty());
    assert_eq!(outcome.sources[0].source, "results.xlsx");
    assert_eq!(outcome.sources[0].file_type, FileType::Tabular);
}

#[tokio::test]
async fn failed_embedding_fails_the_whole_ingestion() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();

    let err = pipeline::ingest(
        &store,
        &index,
        &FailingEmbedder,
        &test_config(),
        "alice@example.com",
        "report.txt",
        "text/plain",
        TEXT_BODY.as_bytes(),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("embedding"));
    // No partial success: nothing was persisted anywhere.
    assert_eq!(store.document_count(), 0);
    assert_eq!(store.chunk_count(), 0);
    assert!(index.is_empty());
}

#[tokio::test]
async fn corrupt_workbook_reports_extraction_failure() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();

    let err = pipeline::ingest(
        &store,
        &index,
        &MockEmbedder,
        &test_config(),
        "alice@example.com",
        "broken.xlsx",
        "",
        b"this is not a zip archive",
    )
    .await
    .unwrap_err();

    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Extraction(msg)) => {
            assert!(msg.contains("workbook"), "reason should name the parse: {}", msg)
        }
        other => panic!("expected extraction error, got {:?}", other),
    }
    assert_eq!(store.document_count(), 0);
}

#[tokio::test]
async fn deleting_a_document_clears_its_index_entries() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let config = test_config();

    let kept = pipeline::ingest(
        &store,
        &index,
        &MockEmbedder,
        &config,
        "alice@example.com",
        "kept.txt",
        "text/plain",
        TEXT_BODY.as_bytes(),
    )
    .await
    .unwrap();
    let dropped = pipeline::ingest(
        &store,
        &index,
        &MockEmbedder,
        &config,
        "alice@example.com",
        "dropped.txt",
        "text/plain",
        TEXT_BODY.as_bytes(),
    )
    .await
    .unwrap();

    let total = kept.chunk_count + dropped.chunk_count;
    assert_eq!(index.len(), total);

    let removed = pipeline::delete_document(&store, &index, dropped.document_id)
        .await
        .unwrap();
    assert_eq!(removed as usize, dropped.chunk_count);
    assert_eq!(index.len(), kept.chunk_count);
    assert_eq!(store.document_count(), 1);

    let user_id = store
        .get_or_create_user("alice@example.com", None)
        .await
        .unwrap();
    let docs = store.list_documents(user_id).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].filename, "kept.txt");
}

#[tokio::test]
async fn session_continuation_reuses_the_session() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let config = test_config();
    let generator = CountingGenerator::default();

    let first = pipeline::answer(
        &store,
        &index,
        &MockEmbedder,
        &generator,
        &config,
        "alice@example.com",
        "First question?",
        Persona::Plain,
        None,
    )
    .await
    .unwrap();

    let second = pipeline::answer(
        &store,
        &index,
        &MockEmbedder,
        &generator,
        &config,
        "alice@example.com",
        "Second question?",
        Persona::Plain,
        Some(first.session_id),
    )
    .await
    .unwrap();

    assert_eq!(first.session_id, second.session_id);
    let messages = store.messages_for_session(first.session_id);
    assert_eq!(messages.len(), 4);
}
