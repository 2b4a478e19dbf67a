//! Admin endpoints: backups, restore, consistency, metrics export.
//!
//! All handlers require the configured bearer token. With no token
//! configured the endpoints are disabled outright.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::error::ProcessingError;
use crate::models::BackupType;

/// Check the bearer token. Returns a 403 response on failure.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.admin_token else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "forbidden", "message": "admin endpoints disabled"})),
        )
            .into_response());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "forbidden", "message": "missing or invalid admin token"})),
        )
            .into_response())
    }
}

#[derive(Deserialize, Default)]
pub struct TriggerBackupRequest {
    /// snapshot | full | incremental | unified; defaults to snapshot.
    #[serde(rename = "type", default)]
    pub backup_type: Option<String>,
}

/// POST /admin/backup/trigger
pub async fn trigger_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TriggerBackupRequest>>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let requested = body
        .and_then(|Json(request)| request.backup_type)
        .unwrap_or_else(|| "snapshot".to_string());
    let Some(backup_type) = BackupType::from_str(&requested) else {
        return ProcessingError::InvalidInput(format!("unknown backup type '{}'", requested))
            .into_response();
    };

    match state.backups.create(backup_type).await {
        Ok(record) => Json(json!({
            "backup_id": record.backup_id,
            "type": record.backup_type.as_str(),
            "size_bytes": record.size_bytes,
            "checksum": record.checksum,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /admin/backups
pub async fn list_backups(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match state.backups.records().list().await {
        Ok(records) => Json(json!({"backups": records})).into_response(),
        Err(e) => ProcessingError::from(e).into_response(),
    }
}

/// POST /admin/backup/verify/:backup_id
pub async fn verify_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(backup_id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match state.backups.verify(&backup_id).await {
        Ok(ok) => Json(json!({"backup_id": backup_id, "verified": ok})).into_response(),
        Err(e) => e.into_response(),
    }
}

/// How long a restore waits for in-flight jobs to drain.
const RESTORE_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// POST /admin/backup/restore/:backup_id - superuser restore.
///
/// Ingestion is paused and drained before any file is touched, the
/// in-memory vector index is reloaded from the restored directory, and
/// after a single-store restore the consistency checker runs so the
/// untouched store is reconciled.
pub async fn restore_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(backup_id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    // Stop ingestion: reject new uploads and wait for running jobs to
    // finish before the store files are replaced.
    state.engine.pause();
    if !state.engine.wait_idle(RESTORE_DRAIN_TIMEOUT).await {
        state.engine.resume();
        return ProcessingError::ServiceUnavailable(
            "jobs still running after drain timeout; retry shortly".into(),
        )
        .into_response();
    }

    let restore_result = state.backups.restore(&backup_id).await;
    // Whatever happened on disk, the in-memory index must match it
    // before queries resume.
    let reload_result = state.vectors.reload().await;
    state.engine.resume();

    let restored_type = match restore_result {
        Ok(t) => t,
        Err(ProcessingError::InvalidInput(message)) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "not_found", "message": message})),
            )
                .into_response()
        }
        Err(e) => return e.into_response(),
    };
    let vector_entries = match reload_result {
        Ok(count) => count,
        Err(e) => return e.into_response(),
    };

    // Unified restores replace both stores together; anything else
    // needs the checker to reconcile the untouched store.
    let consistency = if restored_type != BackupType::Unified {
        match state.checker.check().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("Post-restore consistency check failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    Json(json!({
        "backup_id": backup_id,
        "restored": restored_type.as_str(),
        "vector_entries": vector_entries,
        "consistency": consistency,
    }))
    .into_response()
}

/// GET /admin/consistency/check
pub async fn consistency_check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match state.checker.check().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /admin/consistency/fix - apply the safe auto-fix policy.
pub async fn consistency_fix(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match state.checker.fix_safe().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /admin/metrics - JSON metrics snapshot.
pub async fn metrics_json(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    Json(state.tracker.export_json()).into_response()
}

/// GET /admin/metrics.csv - resource samples as CSV.
pub async fn metrics_csv(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    (
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        state.tracker.export_samples_csv(),
    )
        .into_response()
}
