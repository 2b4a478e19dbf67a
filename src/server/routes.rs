//! Router configuration for the web server.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::{admin, handlers, AppState};

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        // Ingestion
        .route("/upload", post(handlers::upload))
        .route("/upload-priority", post(handlers::upload_priority))
        .route("/job/:job_id", get(handlers::job_status))
        .route("/queue/cancel/:job_id", post(handlers::cancel_job))
        // Paper records
        .route("/paper/:doc_id", get(handlers::get_paper))
        .route("/metadata/:doc_id", get(handlers::get_metadata))
        .route("/layout/:doc_id", get(handlers::get_layout))
        .route("/text/:doc_id", get(handlers::get_text))
        .route("/preview/:doc_id", get(handlers::get_preview))
        .route("/download/:doc_id", get(handlers::download_pdf))
        // Embeddings
        .route("/embedding/:doc_id", get(handlers::get_document_embedding))
        .route("/embedding/:doc_id/pages", get(handlers::get_page_embeddings))
        .route(
            "/embedding/:doc_id/page/:page",
            get(handlers::get_page_embedding),
        )
        // Search
        .route("/search", get(handlers::keyword_search))
        .route("/similar/:doc_id", get(handlers::similar_papers))
        .route("/search/vector", post(handlers::vector_search))
        // Liveness and readiness
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        // Admin (bearer-token gated in the handlers)
        .route("/admin/backup/trigger", post(admin::trigger_backup))
        .route("/admin/backup/restore/:backup_id", post(admin::restore_backup))
        .route("/admin/backups", get(admin::list_backups))
        .route("/admin/backup/verify/:backup_id", post(admin::verify_backup))
        .route("/admin/consistency/check", get(admin::consistency_check))
        .route("/admin/consistency/fix", post(admin::consistency_fix))
        .route("/admin/metrics", get(admin::metrics_json))
        .route("/admin/metrics.csv", get(admin::metrics_csv))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
