//! Relational store abstraction for users, documents, chunks, and chat
//! history.
//!
//! The [`MetadataStore`] trait names every call shape the pipeline needs;
//! the core never issues raw queries outside the [`SqliteStore`]
//! implementation. [`MemoryStore`] backs the tests.

use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::models::{Chunk, FileType};

/// Fields for a new document row.
#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub filename: &'a str,
    pub original_filename: &'a str,
    pub byte_size: i64,
    pub file_type: FileType,
    pub user_id: i64,
    pub chunk_count: i64,
    /// Extraction metadata serialized as JSON.
    pub metadata_json: String,
}

/// Document row as listed back to the user.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub byte_size: i64,
    pub chunk_count: i64,
    pub processed: bool,
    pub uploaded_at: String,
}

/// Chat session summary.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub last_message_at: String,
    pub message_count: i64,
}

/// One message from the chat history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    pub session_id: i64,
    pub session_name: String,
    pub role: String,
    pub content: String,
    pub confidence: Option<f64>,
    pub created_at: String,
}

/// Per-user aggregate counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserStats {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub total_sessions: i64,
    pub total_messages: i64,
    pub avg_confidence: Option<f64>,
}

/// The relational collaborator. All operations are keyed by opaque
/// integer ids; session internals are never inspected beyond these
/// shapes.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a user by email, creating it on first sight.
    async fn get_or_create_user(&self, email: &str, name: Option<&str>) -> Result<i64>;

    /// Insert a document row; returns its id.
    async fn insert_document(&self, doc: &NewDocument<'_>) -> Result<i64>;

    /// Insert chunk rows keyed by document id and index.
    async fn insert_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<()>;

    async fn list_documents(&self, user_id: i64) -> Result<Vec<DocumentInfo>>;

    /// Delete a document and its chunks (cascading).
    async fn delete_document(&self, document_id: i64) -> Result<()>;

    async fn create_session(&self, user_id: i64, name: Option<&str>) -> Result<i64>;

    /// Append a chat message; returns the message id.
    async fn append_message(
        &self,
        session_id: i64,
        role: &str,
        content: &str,
        confidence: Option<f64>,
        source_documents: Option<&[i64]>,
    ) -> Result<i64>;

    async fn chat_history(&self, user_id: i64, limit: i64) -> Result<Vec<ChatRecord>>;

    async fn recent_sessions(&self, user_id: i64, limit: i64) -> Result<Vec<SessionInfo>>;

    async fn user_stats(&self, user_id: i64) -> Result<UserStats>;
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn default_session_name() -> String {
    format!(
        "Conversation {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M")
    )
}

// ============ SQLite implementation ============

/// [`MetadataStore`] backed by the SQLite schema from the migrations.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get_or_create_user(&self, email: &str, name: Option<&str>) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(id) = existing {
            sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            return Ok(id);
        }

        let display_name = name
            .map(|n| n.to_string())
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());

        let id = sqlx::query(
            "INSERT INTO users (email, name, created_at, last_login) VALUES (?, ?, ?, ?)",
        )
        .bind(email)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn insert_document(&self, doc: &NewDocument<'_>) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO documents
                (filename, original_filename, file_size, file_type, user_id, processed, chunk_count, metadata_json, upload_time)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(doc.filename)
        .bind(doc.original_filename)
        .bind(doc.byte_size)
        .bind(doc.file_type.as_str())
        .bind(doc.user_id)
        .bind(doc.chunk_count)
        .bind(&doc.metadata_json)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn insert_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (document_id, chunk_index, chunk_text, chunk_size)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(chunk.char_len())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_documents(&self, user_id: i64) -> Result<Vec<DocumentInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT id, filename, original_filename, file_size, file_type, chunk_count, processed, upload_time
            FROM documents
            WHERE user_id = ?
            ORDER BY upload_time DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentInfo {
                id: row.get("id"),
                filename: row.get("filename"),
                original_filename: row.get("original_filename"),
                file_type: row.get("file_type"),
                byte_size: row.get("file_size"),
                chunk_count: row.get("chunk_count"),
                processed: row.get::<i64, _>("processed") != 0,
                uploaded_at: format_ts_iso(row.get("upload_time")),
            })
            .collect())
    }

    async fn delete_document(&self, document_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            bail!("document {} not found", document_id);
        }
        Ok(())
    }

    async fn create_session(&self, user_id: i64, name: Option<&str>) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let session_name = name
            .map(|n| n.to_string())
            .unwrap_or_else(default_session_name);

        let id = sqlx::query(
            "INSERT INTO chat_sessions (user_id, session_name, created_at, last_message_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(session_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn append_message(
        &self,
        session_id: i64,
        role: &str,
        content: &str,
        confidence: Option<f64>,
        source_documents: Option<&[i64]>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let sources_json = source_documents
            .map(|ids| serde_json::to_string(ids))
            .transpose()?;

        let id = sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, message_type, content, confidence_score, source_documents, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(confidence)
        .bind(sources_json)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE chat_sessions SET last_message_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn chat_history(&self, user_id: i64, limit: i64) -> Result<Vec<ChatRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT cs.id AS session_id, cs.session_name, cm.message_type, cm.content,
                   cm.confidence_score, cm.created_at
            FROM chat_sessions cs
            JOIN chat_messages cm ON cs.id = cm.session_id
            WHERE cs.user_id = ?
            ORDER BY cm.created_at DESC, cm.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChatRecord {
                session_id: row.get("session_id"),
                session_name: row.get("session_name"),
                role: row.get("message_type"),
                content: row.get("content"),
                confidence: row.get("confidence_score"),
                created_at: format_ts_iso(row.get("created_at")),
            })
            .collect())
    }

    async fn recent_sessions(&self, user_id: i64, limit: i64) -> Result<Vec<SessionInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT cs.id, cs.session_name, cs.created_at, cs.last_message_at,
                   COUNT(cm.id) AS message_count
            FROM chat_sessions cs
            LEFT JOIN chat_messages cm ON cs.id = cm.session_id
            WHERE cs.user_id = ?
            GROUP BY cs.id, cs.session_name, cs.created_at, cs.last_message_at
            ORDER BY cs.last_message_at DESC, cs.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SessionInfo {
                id: row.get("id"),
                name: row.get("session_name"),
                created_at: format_ts_iso(row.get("created_at")),
                last_message_at: format_ts_iso(row.get("last_message_at")),
                message_count: row.get("message_count"),
            })
            .collect())
    }

    async fn user_stats(&self, user_id: i64) -> Result<UserStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents WHERE user_id = ?) AS total_documents,
                (SELECT COALESCE(SUM(chunk_count), 0) FROM documents WHERE user_id = ?) AS total_chunks,
                (SELECT COUNT(*) FROM chat_sessions WHERE user_id = ?) AS total_sessions,
                (SELECT COUNT(*) FROM chat_messages cm
                    JOIN chat_sessions cs ON cs.id = cm.session_id
                    WHERE cs.user_id = ?) AS total_messages,
                (SELECT AVG(cm.confidence_score) FROM chat_messages cm
                    JOIN chat_sessions cs ON cs.id = cm.session_id
                    WHERE cs.user_id = ? AND cm.message_type = 'assistant') AS avg_confidence
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserStats {
            total_documents: row.get("total_documents"),
            total_chunks: row.get("total_chunks"),
            total_sessions: row.get("total_sessions"),
            total_messages: row.get("total_messages"),
            avg_confidence: row.get("avg_confidence"),
        })
    }
}

// ============ In-memory implementation ============

#[derive(Default)]
struct MemoryInner {
    users: Vec<(i64, String)>,
    documents: Vec<MemoryDocument>,
    chunks: Vec<(i64, Chunk)>,
    sessions: Vec<MemorySession>,
    messages: Vec<MemoryMessage>,
    next_id: i64,
}

struct MemoryDocument {
    id: i64,
    filename: String,
    original_filename: String,
    byte_size: i64,
    file_type: String,
    user_id: i64,
    chunk_count: i64,
    uploaded_at: i64,
}

struct MemorySession {
    id: i64,
    user_id: i64,
    name: String,
    created_at: i64,
    last_message_at: i64,
}

struct MemoryMessage {
    session_id: i64,
    role: String,
    content: String,
    confidence: Option<f64>,
    created_at: i64,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded for a session, oldest first. Test helper.
    pub fn messages_for_session(&self, session_id: i64) -> Vec<(String, String, Option<f64>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| (m.role.clone(), m.content.clone(), m.confidence))
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.inner.lock().unwrap().documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }
}

impl MemoryInner {
    fn next(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_or_create_user(&self, email: &str, _name: Option<&str>) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner.users.iter().find(|(_, e)| e == email) {
            return Ok(*id);
        }
        let id = inner.next();
        inner.users.push((id, email.to_string()));
        Ok(id)
    }

    async fn insert_document(&self, doc: &NewDocument<'_>) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next();
        let uploaded_at = chrono::Utc::now().timestamp();
        inner.documents.push(MemoryDocument {
            id,
            filename: doc.filename.to_string(),
            original_filename: doc.original_filename.to_string(),
            byte_size: doc.byte_size,
            file_type: doc.file_type.as_str().to_string(),
            user_id: doc.user_id,
            chunk_count: doc.chunk_count,
            uploaded_at,
        });
        Ok(id)
    }

    async fn insert_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for chunk in chunks {
            inner.chunks.push((document_id, chunk.clone()));
        }
        Ok(())
    }

    async fn list_documents(&self, user_id: i64) -> Result<Vec<DocumentInfo>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .documents
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| DocumentInfo {
                id: d.id,
                filename: d.filename.clone(),
                original_filename: d.original_filename.clone(),
                file_type: d.file_type.clone(),
                byte_size: d.byte_size,
                chunk_count: d.chunk_count,
                processed: true,
                uploaded_at: format_ts_iso(d.uploaded_at),
            })
            .collect())
    }

    async fn delete_document(&self, document_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.documents.len();
        inner.documents.retain(|d| d.id != document_id);
        if inner.documents.len() == before {
            bail!("document {} not found", document_id);
        }
        inner.chunks.retain(|(doc, _)| *doc != document_id);
        Ok(())
    }

    async fn create_session(&self, user_id: i64, name: Option<&str>) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next();
        let now = chrono::Utc::now().timestamp();
        inner.sessions.push(MemorySession {
            id,
            user_id,
            name: name
                .map(|n| n.to_string())
                .unwrap_or_else(default_session_name),
            created_at: now,
            last_message_at: now,
        });
        Ok(id)
    }

    async fn append_message(
        &self,
        session_id: i64,
        role: &str,
        content: &str,
        confidence: Option<f64>,
        _source_documents: Option<&[i64]>,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.iter().any(|s| s.id == session_id) {
            bail!("session {} not found", session_id);
        }
        let id = inner.next();
        let now = chrono::Utc::now().timestamp();
        inner.messages.push(MemoryMessage {
            session_id,
            role: role.to_string(),
            content: content.to_string(),
            confidence,
            created_at: now,
        });
        if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == session_id) {
            session.last_message_at = now;
        }
        Ok(id)
    }

    async fn chat_history(&self, user_id: i64, limit: i64) -> Result<Vec<ChatRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<ChatRecord> = inner
            .messages
            .iter()
            .filter_map(|m| {
                let session = inner
                    .sessions
                    .iter()
                    .find(|s| s.id == m.session_id && s.user_id == user_id)?;
                Some(ChatRecord {
                    session_id: session.id,
                    session_name: session.name.clone(),
                    role: m.role.clone(),
                    content: m.content.clone(),
                    confidence: m.confidence,
                    created_at: format_ts_iso(m.created_at),
                })
            })
            .collect();
        records.reverse();
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn recent_sessions(&self, user_id: i64, limit: i64) -> Result<Vec<SessionInfo>> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<SessionInfo> = inner
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| SessionInfo {
                id: s.id,
                name: s.name.clone(),
                created_at: format_ts_iso(s.created_at),
                last_message_at: format_ts_iso(s.last_message_at),
                message_count: inner
                    .messages
                    .iter()
                    .filter(|m| m.session_id == s.id)
                    .count() as i64,
            })
            .collect();
        sessions.reverse();
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    async fn user_stats(&self, user_id: i64) -> Result<UserStats> {
        let inner = self.inner.lock().unwrap();
        let doc_ids: Vec<i64> = inner
            .documents
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.id)
            .collect();
        let session_ids: Vec<i64> = inner
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();

        let confidences: Vec<f64> = inner
            .messages
            .iter()
            .filter(|m| session_ids.contains(&m.session_id) && m.role == "assistant")
            .filter_map(|m| m.confidence)
            .collect();

        Ok(UserStats {
            total_documents: doc_ids.len() as i64,
            total_chunks: inner
                .documents
                .iter()
                .filter(|d| d.user_id == user_id)
                .map(|d| d.chunk_count)
                .sum(),
            total_sessions: session_ids.len() as i64,
            total_messages: inner
                .messages
                .iter()
                .filter(|m| session_ids.contains(&m.session_id))
                .count() as i64,
            avg_confidence: if confidences.is_empty() {
                None
            } else {
                Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn user_creation_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.get_or_create_user("a@example.com", None).await.unwrap();
        let b = store.get_or_create_user("a@example.com", None).await.unwrap();
        let c = store.get_or_create_user("c@example.com", None).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn document_lifecycle() {
        let store = MemoryStore::new();
        let user = store.get_or_create_user("a@example.com", None).await.unwrap();
        let doc_id = store
            .insert_document(&NewDocument {
                filename: "r.txt",
                original_filename: "r.txt",
                byte_size: 10,
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
                    Chunk::new(doc_id, 0, "first".to_string()),
                    Chunk::new(doc_id, 1, "second".to_string()),
                ],
            )
            .await
            .unwrap();

        let docs = store.list_documents(user).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].chunk_count, 2);

        store.delete_document(doc_id).await.unwrap();
        assert_eq!(store.document_count(), 0);
        assert_eq!(store.chunk_count(), 0);
        assert!(store.delete_document(doc_id).await.is_err());
    }

    #[tokio::test]
    async fn stats_average_only_assistant_confidence() {
        let store = MemoryStore::new();
        let user = store.get_or_create_user("a@example.com", None).await.unwrap();
        let session = store.create_session(user, None).await.unwrap();
        store
            .append_message(session, "user", "q", None, None)
            .await
            .unwrap();
        store
            .append_message(session, "assistant", "a", Some(0.8), None)
            .await
            .unwrap();
        store
            .append_message(session, "assistant", "b", Some(0.4), None)
            .await
            .unwrap();

        let stats = store.user_stats(user).await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.total_sessions, 1);
        assert!((stats.avg_confidence.unwrap() - 0.6).abs() < 1e-9);
    }
}
