#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use parquet::arrow::ArrowWriter;
use parquet_formatter::config::AppConfig;
use parquet_formatter::{AppState, create_app};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "---------------------------9051914041544843365972754266";

/// App wired to a private scratch directory.
pub struct TestApp {
    pub app: Router,
    pub scratch: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_state(|state| state)
    }

    pub fn with_state(customize: impl FnOnce(AppState) -> AppState) -> Self {
        Self::with_config(|_| {}, customize)
    }

    pub fn with_config(
        configure: impl FnOnce(&mut AppConfig),
        customize: impl FnOnce(AppState) -> AppState,
    ) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_tests(scratch.path());
        configure(&mut config);
        let state = customize(AppState::from_config(config).unwrap());
        Self {
            app: create_app(state),
            scratch,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn post_multipart(&self, uri: &str, parts: &[Part<'_>]) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_form(&self, uri: &str, pairs: &[(&str, &str)]) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Body::from(serde_urlencoded::to_string(pairs).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("User-Agent", "integration-test")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Files left behind in scratch, ignoring the feedback log.
    pub fn leftovers(&self) -> Vec<String> {
        scratch_entries(self.scratch.path())
            .into_iter()
            .filter(|name| name != "feedback.log")
            .collect()
    }
}

pub fn scratch_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

pub enum Part<'a> {
    File {
        field: &'a str,
        name: &'a str,
        bytes: &'a [u8],
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

pub fn file<'a>(name: &'a str, bytes: &'a [u8]) -> Part<'a> {
    Part::File {
        field: "files",
        name,
        bytes,
    }
}

pub fn url_field(value: &str) -> Part<'_> {
    Part::Text {
        field: "urls",
        value,
    }
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File { field, name, bytes } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        field, name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Status, headers and the fully collected body. A truncated stream shows up
/// as `Err`.
pub async fn collect(response: Response<Body>) -> (StatusCode, axum::http::HeaderMap, Result<Bytes, String>) {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| e.to_string());
    (status, headers, body)
}

pub async fn json_body(response: Response<Body>) -> (StatusCode, Value) {
    let (status, _, body) = collect(response).await;
    (status, serde_json::from_slice(&body.unwrap()).unwrap())
}

/// Two-row Parquet file with an integer and a string column.
pub fn sample_parquet() -> Vec<u8> {
    let batch = RecordBatch::try_from_iter(vec![
        ("id", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
        (
            "name",
            Arc::new(StringArray::from(vec![Some("ada"), None])) as ArrayRef,
        ),
    ])
    .unwrap();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    buffer
}

/// Serve `router` on an ephemeral local port for remote-source tests.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
