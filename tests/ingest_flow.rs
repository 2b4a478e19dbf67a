//! End-to-end ingestion tests over the HTTP surface.
//!
//! External model services are disabled, so optional stages degrade the
//! way they would with open circuits; must-succeed stages run entirely
//! in-process.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use refbase::config::Settings;
use refbase::pdf::minimal_pdf_with_text;
use refbase::repository::migrations;
use refbase::server::{create_router, AppState};

const ADMIN_TOKEN: &str = "test-admin-token";

/// Enough text that the extracted layer passes the density check and
/// OCR is skipped.
const PAPER_TEXT: &str = "Sparse Attention Mechanisms for Long Scholarly Documents. \
We study attention patterns over documents with many pages and report results.";

struct TestServer {
    app: Router,
    state: AppState,
    _dir: TempDir,
}

async fn test_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::with_defaults();
    settings.data_dir = dir.path().join("data");
    settings.admin_token = Some(ADMIN_TOKEN.to_string());
    settings.upload.min_bytes = 16;
    settings.quality.enabled = false;
    settings.layout.enabled = false;
    settings.llm.enabled = false;

    settings.data_layout().ensure_directories().unwrap();
    migrations::run_migrations(&settings.database_url())
        .await
        .unwrap();

    let state = AppState::from_settings(&settings).unwrap();
    state.engine.start().await;
    TestServer {
        app: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

fn multipart_request(uri: &str, bytes: &[u8], priority: Option<&str>) -> Request<Body> {
    let boundary = "test-boundary-7f9a3b";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"paper.pdf\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
    if let Some(priority) = priority {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"priority\"\r\n\r\n{priority}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return (status, Value::Null);
    }
    (status, json_body(response).await)
}

async fn upload(app: &Router, bytes: &[u8]) -> String {
    let response = app
        .clone()
        .oneshot(multipart_request("/upload", bytes, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "uploaded");
    body["job_id"].as_str().unwrap().to_string()
}

/// Poll the job endpoint until the job reaches a terminal state.
async fn wait_for_terminal(app: &Router, job_id: &str) -> Value {
    for _ in 0..300 {
        let (status, body) = get_json(app, &format!("/job/{}", job_id)).await;
        assert_eq!(status, StatusCode::OK);
        match body["status"].as_str() {
            Some("completed") | Some("failed") | Some("cancelled") => return body,
            _ => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    panic!("job {} never reached a terminal state", job_id);
}

fn completed_names(job: &Value) -> Vec<String> {
    job["steps_completed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_ingestion() {
    let server = test_server().await;
    let job_id = upload(&server.app, &minimal_pdf_with_text(PAPER_TEXT)).await;

    let job = wait_for_terminal(&server.app, &job_id).await;
    assert_eq!(job["status"], "completed", "job: {}", job);
    assert_eq!(job["progress_percentage"], 100);

    let completed = completed_names(&job);
    for stage in ["persist_upload", "ocr", "embedding", "finalize"] {
        assert!(completed.contains(&stage.to_string()), "missing {}", stage);
    }

    let paper_id = job["paper_id"].as_str().unwrap().to_string();

    let (status, paper) = get_json(&server.app, &format!("/paper/{}", paper_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paper["content_id"].as_str().unwrap().len(), 64);
    assert_eq!(paper["ocr_regenerated"], false);

    let (status, embedding) = get_json(&server.app, &format!("/embedding/{}", paper_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(embedding["vector"].as_array().unwrap().len(), 384);

    let (status, pages) =
        get_json(&server.app, &format!("/embedding/{}/pages", paper_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pages["pages"].as_array().unwrap().len(), 1);

    let text_response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/text/{}", paper_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(text_response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_identical_bytes_resolve_to_one_paper() {
    let server = test_server().await;
    let bytes = minimal_pdf_with_text(PAPER_TEXT);

    let first = wait_for_terminal(&server.app, &upload(&server.app, &bytes).await).await;
    let second = wait_for_terminal(&server.app, &upload(&server.app, &bytes).await).await;

    assert_eq!(second["status"], "completed");
    assert_eq!(first["paper_id"], second["paper_id"]);

    // Exactly one paper exists; the re-upload became a reference.
    assert_eq!(server.state.papers.count().await.unwrap(), 1);
    let refs = server
        .state
        .papers
        .duplicate_references(first["paper_id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].matched_tier, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_different_bytes_same_content_dedup_level1() {
    let server = test_server().await;
    let bytes = minimal_pdf_with_text(PAPER_TEXT);
    // Trailing bytes after %%EOF change the file hash but parse to the
    // same document.
    let mut padded = bytes.clone();
    padded.extend_from_slice(b"\n% rescue copy\n");

    let first = wait_for_terminal(&server.app, &upload(&server.app, &bytes).await).await;
    let second = wait_for_terminal(&server.app, &upload(&server.app, &padded).await).await;

    assert_eq!(second["status"], "completed");
    assert_eq!(first["paper_id"], second["paper_id"]);
    assert_eq!(server.state.papers.count().await.unwrap(), 1);

    let refs = server
        .state
        .papers
        .duplicate_references(first["paper_id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].matched_tier, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rescanned_document_dedup_level3() {
    let server = test_server().await;
    let original = minimal_pdf_with_text(PAPER_TEXT);
    // A rescan: almost the same token stream, so the document vectors
    // sit well above the 0.95 similarity threshold while every exact
    // hash tier misses.
    let rescanned = minimal_pdf_with_text(&format!("{} rescanned", PAPER_TEXT));

    let first = wait_for_terminal(&server.app, &upload(&server.app, &original).await).await;
    let second = wait_for_terminal(&server.app, &upload(&server.app, &rescanned).await).await;

    assert_eq!(second["status"], "completed");
    assert_eq!(first["paper_id"], second["paper_id"]);
    assert_eq!(server.state.papers.count().await.unwrap(), 1);

    let refs = server
        .state
        .papers
        .duplicate_references(first["paper_id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].matched_tier, 3);
    assert!(refs[0].similarity.unwrap() >= 0.95);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_degraded_run_records_layout_failure() {
    let server = test_server().await;
    let job_id = upload(&server.app, &minimal_pdf_with_text(PAPER_TEXT)).await;
    let job = wait_for_terminal(&server.app, &job_id).await;

    assert_eq!(job["status"], "completed");
    let failed: Vec<(String, String)> = job["steps_failed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| {
            (
                s["name"].as_str().unwrap().to_string(),
                s["reason"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert!(failed.contains(&("layout_analysis".to_string(), "service_unavailable".to_string())));

    // The paper exists, the layout record does not.
    let paper_id = job["paper_id"].as_str().unwrap();
    let (status, _) = get_json(&server.app, &format!("/layout/{}", paper_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_json(&server.app, &format!("/paper/{}", paper_id)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_queue_full_backpressure() {
    // No workers are started, so submissions stay queued.
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::with_defaults();
    settings.data_dir = dir.path().join("data");
    settings.upload.min_bytes = 16;
    settings.max_queue_size = 2;
    settings.data_layout().ensure_directories().unwrap();
    migrations::run_migrations(&settings.database_url())
        .await
        .unwrap();
    let state = AppState::from_settings(&settings).unwrap();
    let app = create_router(state);

    let bytes = minimal_pdf_with_text(PAPER_TEXT);
    for expected in [StatusCode::OK, StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE] {
        let response = app
            .clone()
            .oneshot(multipart_request("/upload", &bytes, None))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
async fn test_cancel_queued_job() {
    // No workers: the job stays queued and can be cancelled.
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::with_defaults();
    settings.data_dir = dir.path().join("data");
    settings.upload.min_bytes = 16;
    settings.data_layout().ensure_directories().unwrap();
    migrations::run_migrations(&settings.database_url())
        .await
        .unwrap();
    let state = AppState::from_settings(&settings).unwrap();
    let app = create_router(state);

    let job_id = upload(&app, &minimal_pdf_with_text(PAPER_TEXT)).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/queue/cancel/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (_, job) = get_json(&app, &format!("/job/{}", job_id)).await;
    assert_eq!(job["status"], "cancelled");

    // Cancelling again: the job already left the queue.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/queue/cancel/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_after_completion_is_rejected() {
    let server = test_server().await;
    let job_id = upload(&server.app, &minimal_pdf_with_text(PAPER_TEXT)).await;
    wait_for_terminal(&server.app, &job_id).await;

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/queue/cancel/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "cannot_cancel");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_priority_upload_validation() {
    let server = test_server().await;
    let bytes = minimal_pdf_with_text(PAPER_TEXT);

    let response = server
        .app
        .clone()
        .oneshot(multipart_request("/upload-priority", &bytes, Some("urgent")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .app
        .clone()
        .oneshot(multipart_request("/upload-priority", &bytes, Some("asap")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_upload_rejected() {
    let server = test_server().await;
    let response = server
        .app
        .clone()
        .oneshot(multipart_request("/upload", b"this is not a pdf at all", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vector_search_validates_dimensions() {
    let server = test_server().await;
    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/search/vector")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"vector": [0.1, 0.2]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_consistency_check_and_repair() {
    let server = test_server().await;
    let job_id = upload(&server.app, &minimal_pdf_with_text(PAPER_TEXT)).await;
    let job = wait_for_terminal(&server.app, &job_id).await;
    let paper_id = job["paper_id"].as_str().unwrap().to_string();

    // Damage the vector store.
    server.state.vectors.remove(&paper_id).await.unwrap();

    let check = |uri: &'static str, method: &'static str| {
        let app = server.app.clone();
        async move {
            let response = app
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            json_body(response).await
        }
    };

    let report = check("/admin/consistency/check", "GET").await;
    assert_eq!(report["issues"].as_array().unwrap().len(), 1);
    assert_eq!(report["issues"][0]["class"], "paper_without_vector");

    let fix = check("/admin/consistency/fix", "POST").await;
    assert_eq!(fix["fixed"], 1);
    assert_eq!(fix["failed"], 0);

    let report = check("/admin/consistency/check", "GET").await;
    assert!(report["issues"].as_array().unwrap().is_empty());
    assert_eq!(report["readiness_score"], 10.0);

    // Second fix pass has nothing left to do.
    let fix = check("/admin/consistency/fix", "POST").await;
    assert_eq!(fix["fixed"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_requires_token() {
    let server = test_server().await;
    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/consistency/check")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/consistency/check")
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backup_trigger_and_verify_via_api() {
    let server = test_server().await;

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/backup/trigger")
                .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type": "unified"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let backup_id = body["backup_id"].as_str().unwrap().to_string();
    assert_eq!(body["type"], "unified");

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/backup/verify/{}", backup_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["verified"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_keyword_search_finds_page_text() {
    let server = test_server().await;
    let job_id = upload(&server.app, &minimal_pdf_with_text(PAPER_TEXT)).await;
    let job = wait_for_terminal(&server.app, &job_id).await;
    let paper_id = job["paper_id"].as_str().unwrap();

    let (status, body) = get_json(&server.app, "/search?q=Sparse%20Attention").await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["doc_id"], paper_id);

    let (_, body) = get_json(&server.app, "/search?q=nonexistent-term").await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_paused_engine_rejects_uploads() {
    let server = test_server().await;
    let bytes = minimal_pdf_with_text(PAPER_TEXT);

    server.state.engine.pause();
    assert!(server.state.engine.wait_idle(Duration::from_secs(5)).await);
    let response = server
        .app
        .clone()
        .oneshot(multipart_request("/upload", &bytes, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    server.state.engine.resume();
    let job_id = upload(&server.app, &bytes).await;
    let job = wait_for_terminal(&server.app, &job_id).await;
    assert_eq!(job["status"], "completed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restore_pauses_and_reloads_vector_index() {
    let server = test_server().await;
    let job_id = upload(&server.app, &minimal_pdf_with_text(PAPER_TEXT)).await;
    let job = wait_for_terminal(&server.app, &job_id).await;
    let paper_id = job["paper_id"].as_str().unwrap().to_string();

    // Unified backup of the healthy state.
    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/backup/trigger")
                .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type": "unified"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let backup_id = json_body(response).await["backup_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Lose the paper's vectors, on disk and in memory.
    server.state.vectors.remove(&paper_id).await.unwrap();
    assert!(!server.state.vectors.contains(&paper_id).await);

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/backup/restore/{}", backup_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["restored"], "unified");
    assert_eq!(body["vector_entries"], 1);

    // The live index serves the restored vectors without a process
    // restart, and ingestion resumed.
    assert!(server.state.vectors.contains(&paper_id).await);
    assert!(!server.state.engine.is_paused());
    let (status, _) = get_json(&server.app, &format!("/embedding/{}", paper_id)).await;
    assert_eq!(status, StatusCode::OK);

    let second = upload(&server.app, &minimal_pdf_with_text(PAPER_TEXT)).await;
    let second_job = wait_for_terminal(&server.app, &second).await;
    assert_eq!(second_job["status"], "completed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_and_status() {
    let server = test_server().await;

    let (status, body) = get_json(&server.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get_json(&server.app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    let services = body["services"].as_array().unwrap();
    assert_eq!(services.len(), 3);
    assert!(services.iter().all(|s| s["state"] == "closed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_ids_return_404() {
    let server = test_server().await;
    for uri in [
        "/job/nope",
        "/paper/nope",
        "/metadata/nope",
        "/embedding/nope",
        "/layout/nope",
        "/text/nope",
        "/preview/nope",
        "/download/nope",
        "/similar/nope",
    ] {
        let (status, _) = get_json(&server.app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "uri {}", uri);
    }
}
