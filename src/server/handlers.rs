//! HTTP request handlers for the public surface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::engine::CancelOutcome;
use crate::error::ProcessingError;
use crate::models::{JobPriority, ProcessingJob};

/// The client address used for rate limiting. Proxy headers are not
/// consulted; behind a reverse proxy the proxy address is what gets
/// limited.
fn client_ip(connect_info: Option<&ConnectInfo<SocketAddr>>) -> IpAddr {
    connect_info
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Job status payload shared by upload and status endpoints.
fn job_payload(job: &ProcessingJob) -> serde_json::Value {
    json!({
        "job_id": job.job_id,
        "filename": job.filename,
        "status": job.status.as_str(),
        "priority": job.priority.as_str(),
        "progress_percentage": job.progress_percentage,
        "current_step": job.current_step,
        "steps_completed": job.steps_completed,
        "steps_failed": job.steps_failed,
        "error_message": job.error_message,
        "paper_id": job.paper_id,
        "created_at": job.created_at.to_rfc3339(),
        "started_at": job.started_at.map(|t| t.to_rfc3339()),
        "completed_at": job.completed_at.map(|t| t.to_rfc3339()),
    })
}

/// Map submit errors onto the documented status codes (413 for
/// oversized uploads, which the generic mapping cannot distinguish).
fn submit_error_response(error: ProcessingError) -> Response {
    if let ProcessingError::InvalidInput(message) = &error {
        if message.contains("file too large") {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"error": "invalid_input", "message": message})),
            )
                .into_response();
        }
    }
    error.into_response()
}

struct UploadParts {
    bytes: Vec<u8>,
    filename: String,
    priority: Option<String>,
}

async fn read_multipart(multipart: &mut Multipart) -> Result<UploadParts, ProcessingError> {
    let mut bytes = None;
    let mut filename = None;
    let mut priority = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ProcessingError::InvalidInput(format!("bad multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            ProcessingError::InvalidInput(format!("failed to read upload: {}", e))
                        })?
                        .to_vec(),
                );
            }
            Some("priority") => {
                priority = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| {
                            ProcessingError::InvalidInput(format!("bad priority field: {}", e))
                        })?,
                );
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ProcessingError::InvalidInput("missing file field".into()))?;
    Ok(UploadParts {
        bytes,
        filename: filename.unwrap_or_else(|| "upload.pdf".to_string()),
        priority,
    })
}

async fn submit_upload(
    state: &AppState,
    source: IpAddr,
    parts: UploadParts,
    priority: JobPriority,
) -> Response {
    if let Err(e) = state.rate_limiter.check_and_record(source) {
        state.tracker.record_error(e.kind_str());
        return e.into_response();
    }

    match state.engine.submit(&parts.bytes, &parts.filename, priority).await {
        Ok(job_id) => Json(json!({"job_id": job_id, "status": "uploaded"})).into_response(),
        Err(e) => {
            state.tracker.record_error(e.kind_str());
            submit_error_response(e)
        }
    }
}

/// POST /upload - enqueue a PDF at normal priority.
pub async fn upload(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut multipart: Multipart,
) -> Response {
    let source = client_ip(connect_info.as_ref());
    match read_multipart(&mut multipart).await {
        Ok(parts) => submit_upload(&state, source, parts, JobPriority::Normal).await,
        Err(e) => e.into_response(),
    }
}

/// POST /upload-priority - enqueue with an explicit priority field.
pub async fn upload_priority(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut multipart: Multipart,
) -> Response {
    let source = client_ip(connect_info.as_ref());
    let parts = match read_multipart(&mut multipart).await {
        Ok(parts) => parts,
        Err(e) => return e.into_response(),
    };

    let priority = match &parts.priority {
        Some(raw) => match JobPriority::from_str(raw) {
            Some(priority) => priority,
            None => {
                return ProcessingError::InvalidInput(format!("invalid priority '{}'", raw))
                    .into_response()
            }
        },
        None => JobPriority::Normal,
    };

    submit_upload(&state, source, parts, priority).await
}

/// GET /job/:job_id - live job status.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.engine.status(&job_id).await {
        Ok(Some(job)) => Json(job_payload(&job)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /queue/cancel/:job_id - cancel while still queued.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.engine.cancel(&job_id).await {
        Ok(CancelOutcome::Cancelled) => {
            Json(json!({"job_id": job_id, "status": "cancelled"})).into_response()
        }
        Ok(CancelOutcome::CannotCancel) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "cannot_cancel", "message": "job already left the queue"})),
        )
            .into_response(),
        Ok(CancelOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /paper/:doc_id
pub async fn get_paper(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    match state.papers.get(&doc_id).await {
        Ok(Some(paper)) => Json(paper).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => ProcessingError::from(e).into_response(),
    }
}

/// GET /metadata/:doc_id
pub async fn get_metadata(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    match state.papers.get_metadata(&doc_id).await {
        Ok(Some(metadata)) => Json(metadata).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => ProcessingError::from(e).into_response(),
    }
}

/// GET /layout/:doc_id
pub async fn get_layout(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    match state.papers.get_layout(&doc_id).await {
        Ok(Some(layout)) => Json(layout).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => ProcessingError::from(e).into_response(),
    }
}

/// GET /text/:doc_id - extracted text, one page after another.
pub async fn get_text(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    match state.papers.get_pages(&doc_id).await {
        Ok(pages) if pages.is_empty() => StatusCode::NOT_FOUND.into_response(),
        Ok(pages) => {
            let text: Vec<String> = pages.into_iter().map(|p| p.page_text).collect();
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                text.join("\n\n"),
            )
                .into_response()
        }
        Err(e) => ProcessingError::from(e).into_response(),
    }
}

/// GET /preview/:doc_id - first-page PNG.
pub async fn get_preview(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    serve_file(
        state.paths.preview_path(&doc_id),
        "image/png",
        None,
    )
    .await
}

/// GET /download/:doc_id - the stored PDF.
pub async fn download_pdf(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    serve_file(
        state.paths.pdf_path(&doc_id),
        "application/pdf",
        Some(format!("attachment; filename=\"{}.pdf\"", doc_id)),
    )
    .await
}

async fn serve_file(
    path: std::path::PathBuf,
    content_type: &'static str,
    disposition: Option<String>,
) -> Response {
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mut response = ([(header::CONTENT_TYPE, content_type)], bytes).into_response();
            if let Some(value) = disposition {
                if let Ok(value) = value.parse() {
                    response
                        .headers_mut()
                        .insert(header::CONTENT_DISPOSITION, value);
                }
            }
            response
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /embedding/:doc_id - the document vector.
pub async fn get_document_embedding(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Response {
    match state.vectors.get(&doc_id).await {
        Some(entry) => Json(json!({
            "doc_id": entry.doc_id,
            "model_name": entry.model_name,
            "vector_dim": entry.vector_dim,
            "vector": entry.document,
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /embedding/:doc_id/pages - all page vectors.
pub async fn get_page_embeddings(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Response {
    match state.vectors.get(&doc_id).await {
        Some(entry) => {
            let pages: Vec<serde_json::Value> = entry
                .pages
                .iter()
                .map(|(page, vector)| json!({"page_number": page, "vector": vector}))
                .collect();
            Json(json!({
                "doc_id": entry.doc_id,
                "model_name": entry.model_name,
                "vector_dim": entry.vector_dim,
                "pages": pages,
            }))
            .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /embedding/:doc_id/page/:page - a single page vector.
pub async fn get_page_embedding(
    State(state): State<AppState>,
    Path((doc_id, page)): Path<(String, u32)>,
) -> Response {
    match state.vectors.get(&doc_id).await {
        Some(entry) => match entry.pages.get(&page) {
            Some(vector) => Json(json!({
                "doc_id": entry.doc_id,
                "page_number": page,
                "vector_dim": entry.vector_dim,
                "vector": vector,
            }))
            .into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// GET /search?q= - keyword search over the relational store.
pub async fn keyword_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    if params.q.trim().is_empty() {
        return Json(json!({"results": []})).into_response();
    }
    match state.papers.search(&params.q, params.limit.clamp(1, 100)).await {
        Ok(papers) => Json(json!({"results": papers})).into_response(),
        Err(e) => ProcessingError::from(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct SimilarParams {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

/// GET /similar/:doc_id - nearest neighbors of a stored paper.
pub async fn similar_papers(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Response {
    let Some(entry) = state.vectors.get(&doc_id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state
        .vectors
        .search(&entry.document, params.top_k.clamp(1, 100) + 1)
        .await
    {
        Ok(hits) => {
            let neighbors: Vec<_> = hits.into_iter().filter(|h| h.doc_id != doc_id).collect();
            Json(json!({"doc_id": doc_id, "results": neighbors})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct VectorSearchRequest {
    pub vector: Vec<f32>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// POST /search/vector - nearest neighbors of a caller-supplied vector.
pub async fn vector_search(
    State(state): State<AppState>,
    Json(request): Json<VectorSearchRequest>,
) -> Response {
    if request.vector.is_empty() {
        return ProcessingError::InvalidInput("empty query vector".into()).into_response();
    }
    if request.vector.len() != state.embedder.dim() as usize {
        return ProcessingError::InvalidInput(format!(
            "expected vector of dim {}, got {}",
            state.embedder.dim(),
            request.vector.len()
        ))
        .into_response();
    }

    match state
        .vectors
        .search(&request.vector, request.top_k.clamp(1, 100))
        .await
    {
        Ok(hits) => Json(json!({"results": hits})).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /health - liveness.
pub async fn health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

/// GET /status - per-service readiness and queue/store gauges.
pub async fn status(State(state): State<AppState>) -> Response {
    let paper_count = state.papers.count().await.unwrap_or(0);
    Json(json!({
        "services": state.breakers.snapshots(),
        "queue_depth": state.engine.queue_depth(),
        "active_jobs": state.tracker.active_jobs(),
        "papers": paper_count,
        "vectors": state.vectors.len().await,
        "resources": state.tracker.latest_sample(),
    }))
    .into_response()
}
