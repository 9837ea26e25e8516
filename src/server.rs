//! HTTP server for the document intelligence API.
//!
//! Exposes ingestion, querying, and history over a JSON API. File
//! uploads arrive as base64 payloads in JSON bodies.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/documents` | Ingest a file (base64 content) |
//! | `GET`  | `/documents` | List a user's documents |
//! | `DELETE` | `/documents/{id}` | Delete a document and its vectors |
//! | `POST` | `/query` | Ask a question over the user's documents |
//! | `GET`  | `/chat/history` | Recent chat messages |
//! | `GET`  | `/chat/sessions` | Recent chat sessions |
//! | `GET`  | `/stats` | Per-user counters |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `unsupported_type` (415), `extraction_failed` (422), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::compose::Persona;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::generation::{create_generator, Generator};
use crate::index::{SqliteIndex, VectorIndex};
use crate::pipeline::{self, PipelineError};
use crate::store::{MetadataStore, SqliteStore};

/// Fallback user when a request names none.
const DEFAULT_USER: &str = "demo@example.com";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        store: Arc::new(SqliteStore::new(pool.clone())),
        index: Arc::new(SqliteIndex::new(pool)),
        embedder: Arc::from(create_embedder(&config.embedding)?),
        generator: Arc::from(create_generator(&config.generation)?),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/documents", post(handle_upload).get(handle_list_documents))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/query", post(handle_query))
        .route("/chat/history", get(handle_history))
        .route("/chat/sessions", get(handle_sessions))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(state);

    println!("docsense server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map pipeline and collaborator errors to HTTP responses. Validation
/// failures are client errors; everything else surfaces the underlying
/// message with a 500.
fn classify_error(err: anyhow::Error) -> AppError {
    if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
        return match pipeline_err {
            PipelineError::Validation(msg) => bad_request(msg.clone()),
            PipelineError::Unsupported(msg) => AppError {
                status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
                code: "unsupported_type".to_string(),
                message: msg.clone(),
            },
            PipelineError::Extraction(msg) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "extraction_failed".to_string(),
                message: msg.clone(),
            },
        };
    }

    let msg = err.to_string();
    if msg.contains("not found") {
        not_found(msg)
    } else {
        internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    /// File bytes, base64-encoded.
    content_base64: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    user_email: Option<String>,
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let content = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.as_bytes())
        .map_err(|e| bad_request(format!("invalid base64 content: {}", e)))?;

    let report = pipeline::ingest(
        state.store.as_ref(),
        state.index.as_ref(),
        state.embedder.as_ref(),
        &state.config,
        req.user_email.as_deref().unwrap_or(DEFAULT_USER),
        &req.filename,
        req.content_type.as_deref().unwrap_or(""),
        &content,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "message": format!("Document '{}' processed successfully", req.filename),
        "document": report,
    })))
}

// ============ GET /documents ============

#[derive(Deserialize)]
struct UserParams {
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = params.user_email.as_deref().unwrap_or(DEFAULT_USER);
    let user_id = state
        .store
        .get_or_create_user(email, None)
        .await
        .map_err(classify_error)?;
    let documents = state
        .store
        .list_documents(user_id)
        .await
        .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "user_email": email,
        "documents": documents,
    })))
}

// ============ DELETE /documents/{id} ============

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = pipeline::delete_document(state.store.as_ref(), state.index.as_ref(), id)
        .await
        .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "deleted": id,
        "vectors_removed": removed,
    })))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    persona: Option<String>,
    #[serde(default)]
    session_id: Option<i64>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let persona = match req.persona.as_deref() {
        Some(p) => p
            .parse::<Persona>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => Persona::default(),
    };

    let outcome = pipeline::answer(
        state.store.as_ref(),
        state.index.as_ref(),
        state.embedder.as_ref(),
        state.generator.as_ref(),
        &state.config,
        req.user_email.as_deref().unwrap_or(DEFAULT_USER),
        &req.question,
        persona,
        req.session_id,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(serde_json::to_value(&outcome).map_err(|e| internal(e.to_string()))?))
}

// ============ GET /chat/history ============

async fn handle_history(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = params.user_email.as_deref().unwrap_or(DEFAULT_USER);
    let user_id = state
        .store
        .get_or_create_user(email, None)
        .await
        .map_err(classify_error)?;
    let messages = state
        .store
        .chat_history(user_id, params.limit.unwrap_or(50))
        .await
        .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "user_email": email,
        "messages": messages,
    })))
}

// ============ GET /chat/sessions ============

async fn handle_sessions(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = params.user_email.as_deref().unwrap_or(DEFAULT_USER);
    let user_id = state
        .store
        .get_or_create_user(email, None)
        .await
        .map_err(classify_error)?;
    let sessions = state
        .store
        .recent_sessions(user_id, params.limit.unwrap_or(10))
        .await
        .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "user_email": email,
        "sessions": sessions,
    })))
}

// ============ GET /stats ============

async fn handle_stats(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = params.user_email.as_deref().unwrap_or(DEFAULT_USER);
    let user_id = state
        .store
        .get_or_create_user(email, None)
        .await
        .map_err(classify_error)?;
    let stats = state
        .store
        .user_stats(user_id)
        .await
        .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "user_email": email,
        "stats": stats,
    })))
}
