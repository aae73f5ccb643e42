//! Route handler functions for all API endpoints.
//!
//! Handlers validate request parameters, call into `DocqaService`, and
//! return JSON. Domain errors convert to `ApiError` via `?`.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use docqa_core::types::{Answer, DocumentInfo, IngestReport};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub question: Option<String>,
    pub top_k: Option<usize>,
}

/// Request body for POST /query_structured.
#[derive(Debug, Deserialize)]
pub struct StructuredQueryRequest {
    pub question: String,
    /// JSON Schema or shorthand describing the desired answer.
    pub response_format: Value,
    pub top_k: Option<usize>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub generation_provider: String,
    pub generation_model: String,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub vectors: usize,
    pub documents: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub document: DocumentInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentInfo>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// "success" when every document was indexed, "partial" otherwise.
    pub status: String,
    #[serde(flatten)]
    pub report: IngestReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub removed: usize,
    pub total_vectors: usize,
}

const ENDPOINTS: &[&str] = &[
    "GET /",
    "GET /health",
    "POST /upload?name=",
    "GET /documents",
    "POST /ingest",
    "GET /query?question=&top_k=",
    "POST /query_structured",
    "POST /clear",
];

// =============================================================================
// Handlers
// =============================================================================

/// GET / - service info.
pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    let config = state.service.config();
    Json(ServiceInfo {
        name: "docqa".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        embedding_provider: config.embedding.provider.clone(),
        embedding_model: config.embedding.model.clone(),
        generation_provider: config.generation.provider.clone(),
        generation_model: state.service.generation_model().to_string(),
        endpoints: ENDPOINTS.iter().map(|e| e.to_string()).collect(),
    })
}

/// GET /health - liveness plus index and corpus size.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let documents = state.service.list_documents()?.len();
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        vectors: state.service.index().len(),
        documents,
    }))
}

/// POST /upload?name= - store the raw request body as a document.
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("'name' query parameter is required".to_string()))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("request body is empty".to_string()));
    }

    let document = state.service.upload(&name, &body)?;
    Ok(Json(UploadResponse {
        message: format!("Uploaded {}. Run /ingest to make it searchable.", document.name),
        document,
    }))
}

/// GET /documents - list stored documents.
pub async fn documents(State(state): State<AppState>) -> Result<Json<DocumentsResponse>, ApiError> {
    let documents = state.service.list_documents()?;
    Ok(Json(DocumentsResponse {
        count: documents.len(),
        documents,
    }))
}

/// POST /ingest - index every stored document.
pub async fn ingest(State(state): State<AppState>) -> Result<Json<IngestResponse>, ApiError> {
    let report = state.service.ingest().await?;
    let status = if report.is_partial() { "partial" } else { "success" };
    info!(
        status,
        documents = report.documents_ingested,
        chunks = report.chunks_processed,
        "Ingest request complete"
    );
    Ok(Json(IngestResponse {
        status: status.to_string(),
        report,
    }))
}

/// GET /query?question=&top_k= - free-text answer.
pub async fn query(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Answer>, ApiError> {
    let question = params
        .question
        .ok_or_else(|| ApiError::BadRequest("'question' query parameter is required".to_string()))?;
    let answer = state.service.query(&question, params.top_k).await?;
    Ok(Json(answer))
}

/// POST /query_structured - answer conforming to `response_format`.
pub async fn query_structured(
    State(state): State<AppState>,
    Json(body): Json<StructuredQueryRequest>,
) -> Result<Json<Answer>, ApiError> {
    let answer = state
        .service
        .query_structured(&body.question, &body.response_format, body.top_k)
        .await?;
    Ok(Json(answer))
}

/// POST /clear - drop every indexed vector.
pub async fn clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, ApiError> {
    let removed = state.service.clear_index().await?;
    Ok(Json(ClearResponse {
        removed,
        total_vectors: state.service.index().len(),
    }))
}
