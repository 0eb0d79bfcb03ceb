//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use agam::config::{LimitsConfig, ServiceMode};
use agam::db::Database;
use agam::dispatch::{Dispatcher, DispatcherOptions};
use agam::engine::Engine;
use agam::jobs::{JobStore, NullJobStore, SqliteJobStore};
use agam::storage::{FsBlobStore, TempStorage};

use crate::routes;
use crate::state::AppState;

const BOUNDARY: &str = "agam-test-boundary";

struct TestApp {
    router: Router,
    _dispatcher: Arc<Dispatcher>,
    _temp_dir: TempDir,
}

impl TestApp {
    fn new(mode: ServiceMode) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();

        let store: Arc<dyn JobStore> = match mode {
            ServiceMode::Durable => Arc::new(SqliteJobStore::new(
                Database::open(&base.join("agam.db")).unwrap(),
            )),
            ServiceMode::Streaming => Arc::new(NullJobStore),
        };
        let blobs = FsBlobStore::new(base.join("blobs")).unwrap();
        let temp = TempStorage::new(base.join("temp")).unwrap();

        let options = DispatcherOptions {
            mode,
            limits: LimitsConfig::default(),
            worker_count: 2,
            queue_capacity: 8,
            retention: Duration::from_secs(3600),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            options,
            store,
            Arc::new(blobs),
            Arc::new(Engine::new(temp, None, None)),
        ));

        Self {
            router: routes::router(AppState::new(Arc::clone(&dispatcher))),
            _dispatcher: dispatcher,
            _temp_dir: temp_dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let (status, _, body) = self.send(request).await;
        (status, body)
    }

    async fn wait_for_terminal(&self, id: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            let (status, body) = self.get(&format!("/jobs/{}", id)).await;
            assert_eq!(status, StatusCode::OK);
            let job: Value = serde_json::from_slice(&body).unwrap();
            if job["status"] == "completed" || job["status"] == "failed" {
                return job;
            }
            assert!(Instant::now() < deadline, "job {} did not finish", id);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

enum Part<'a> {
    File(&'a str, &'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_ok() {
    let app = TestApp::new(ServiceMode::Durable);

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["store_reachable"], true);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = TestApp::new(ServiceMode::Durable);

    let (status, body) = app.get("/jobs/does-not-exist").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn test_upload_then_download() {
    let app = TestApp::new(ServiceMode::Durable);

    let request = multipart(
        "/upload",
        &[
            Part::File("file", "notes.txt", b"first line\nsecond line"),
            Part::Text("operation", "convert_to_pdf"),
        ],
    );
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job: Value = serde_json::from_slice(&body).unwrap();
    let id = job["id"].as_str().unwrap().to_string();

    let job = app.wait_for_terminal(&id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["processed_filename"], "notes.pdf");

    let request = Request::get(format!("/jobs/{}/download", id))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains("notes.pdf"));
    assert!(body.starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_delete_removes_job() {
    let app = TestApp::new(ServiceMode::Durable);

    let request = multipart("/upload", &[Part::File("file", "a.txt", b"hello")]);
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job: Value = serde_json::from_slice(&body).unwrap();
    let id = job["id"].as_str().unwrap().to_string();
    app.wait_for_terminal(&id).await;

    let request = Request::delete(format!("/jobs/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/jobs/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_single_file_merge_is_bad_request() {
    let app = TestApp::new(ServiceMode::Durable);

    let request = multipart("/merge", &[Part::File("files", "only.pdf", b"%PDF-1.5")]);
    let (status, _, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].is_string());

    let (_, body) = app.get("/jobs").await;
    let page: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn test_upload_with_two_files_is_bad_request() {
    let app = TestApp::new(ServiceMode::Durable);

    let request = multipart(
        "/upload",
        &[
            Part::File("file", "a.txt", b"first"),
            Part::File("file", "b.txt", b"second"),
        ],
    );
    let (status, _, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "Maximum 1 files allowed, got 2");

    let (_, body) = app.get("/jobs").await;
    let page: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn test_unknown_status_filter_is_bad_request() {
    let app = TestApp::new(ServiceMode::Durable);

    let (status, _) = app.get("/jobs?status=done").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_streaming_mode_returns_file_body() {
    let app = TestApp::new(ServiceMode::Streaming);

    let request = multipart("/upload", &[Part::File("file", "memo.txt", b"streamed")]);
    let (status, headers, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("memo.pdf"));
    assert!(body.starts_with(b"%PDF"));

    let (status, _) = app.get("/jobs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["mode"], "streaming");
}
