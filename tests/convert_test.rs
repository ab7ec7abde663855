mod common;

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use common::{TestApp, collect, file, json_body, sample_parquet};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet_formatter::services::conversion::{
    ChunkStream, ConversionEngine, ConversionError, ConversionPair, ConversionRegistry,
    OutputSettings,
};

#[tokio::test]
async fn test_parquet_to_csv_single_file() {
    let app = TestApp::new();
    let parquet = sample_parquet();

    let response = app
        .post_multipart("/convert/parquet-to-csv", &[file("people.parquet", &parquet)])
        .await;
    let (status, headers, body) = collect(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "text/csv");
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"people.csv\""
    );
    assert_eq!(&body.unwrap()[..], b"id,name\n1,ada\n2,\n");
    assert!(app.leftovers().is_empty());
}

#[tokio::test]
async fn test_csv_to_parquet_round_trips_rows() {
    let app = TestApp::new();

    let response = app
        .post_multipart(
            "/convert/csv-to-parquet",
            &[file("scores.csv", b"player,score\nada,10\nlin,7\n")],
        )
        .await;
    let (status, headers, body) = collect(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"scores.parquet\""
    );

    let reader = ParquetRecordBatchReaderBuilder::try_new(body.unwrap())
        .unwrap()
        .build()
        .unwrap();
    let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
    assert_eq!(rows, 2);
    assert!(app.leftovers().is_empty());
}

#[tokio::test]
async fn test_csv_to_ndjson() {
    let app = TestApp::new();

    let response = app
        .post_multipart("/convert/csv-to-ndjson", &[file("people.csv", b"name,age\nada,36\n")])
        .await;
    let (status, headers, body) = collect(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/x-ndjson");
    let text = String::from_utf8(body.unwrap().to_vec()).unwrap();
    let record: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(record["name"], "ada");
    assert_eq!(record["age"], 36);
}

#[tokio::test]
async fn test_ndjson_to_csv_flattens_and_unions_columns() {
    let app = TestApp::new();
    let ndjson = b"{\"a\":1,\"b\":{\"c\":\"x\"}}\n{\"a\":2,\"d\":true}\n";

    let response = app
        .post_multipart("/convert/ndjson-to-csv", &[file("events.ndjson", ndjson)])
        .await;
    let (status, _, body) = collect(response).await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.unwrap().to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["a,b.c,d", "1,x,", "2,,true"]);
}

#[tokio::test]
async fn test_multiple_sources_become_archive() {
    let app = TestApp::new();

    let response = app
        .post_multipart(
            "/convert/csv-to-ndjson",
            &[
                file("data.csv", b"x\n1\n"),
                file("other.csv", b"y\n2\n"),
                file("data.csv", b"z\n3\n"),
            ],
        )
        .await;
    let (status, headers, body) = collect(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/zip");
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"converted_files.zip\""
    );

    let mut archive = zip::ZipArchive::new(Cursor::new(body.unwrap())).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["data.ndjson", "other.ndjson", "data-2.ndjson"]);

    let mut third = String::new();
    archive
        .by_index(2)
        .unwrap()
        .read_to_string(&mut third)
        .unwrap();
    assert_eq!(third.trim(), "{\"z\":3}");
    assert!(app.leftovers().is_empty());
}

#[tokio::test]
async fn test_one_bad_member_fails_whole_batch() {
    let app = TestApp::new();
    let parquet = sample_parquet();

    let response = app
        .post_multipart(
            "/convert/parquet-to-csv",
            &[
                file("good.parquet", &parquet),
                file("broken.parquet", b"definitely not parquet"),
            ],
        )
        .await;
    let (status, body) = json_body(response).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["code"], "conversion_failed");
    assert!(
        body["detail"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Failed to convert broken.parquet")
    );
    assert!(app.leftovers().is_empty());
}

#[tokio::test]
async fn test_too_many_sources_rejected_and_released() {
    let app = TestApp::new();
    let parts: Vec<_> = (0..6).map(|_| file("a.csv", b"x\n1\n")).collect();

    let response = app.post_multipart("/convert/csv-to-ndjson", &parts).await;
    let (status, body) = json_body(response).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["code"], "too_many_files");
    assert!(app.leftovers().is_empty());
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let app = TestApp::with_config(|c| c.max_source_bytes = 16, |s| s);
    let big = vec![b'x'; 64];

    let response = app
        .post_multipart("/convert/csv-to-ndjson", &[file("big.csv", &big)])
        .await;
    let (status, body) = json_body(response).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["detail"]["code"], "file_too_large");
    assert_eq!(
        body["detail"]["message"],
        "File 'big.csv' exceeds the 16 bytes limit."
    );
    assert!(app.leftovers().is_empty());
}

#[tokio::test]
async fn test_empty_request_is_missing_files() {
    let app = TestApp::new();

    let response = app.post_multipart("/convert/csv-to-ndjson", &[]).await;
    let (status, body) = json_body(response).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["code"], "missing_files");
}

#[tokio::test]
async fn test_unknown_pair_is_not_found() {
    let app = TestApp::new();

    let response = app
        .post_multipart("/convert/csv-to-xml", &[file("a.csv", b"x\n1\n")])
        .await;
    let (status, body) = json_body(response).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"]["code"], "unknown_conversion");
}

#[tokio::test]
async fn test_disallowed_scheme_rejected_before_download() {
    let app = TestApp::new();

    let response = app
        .post_form("/convert/csv-to-ndjson", &[("urls", "ftp://example.com/a.csv")])
        .await;
    let (status, body) = json_body(response).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["code"], "invalid_url_scheme");
}

#[tokio::test]
async fn test_versioned_routes() {
    let app = TestApp::new();

    let response = app
        .post_multipart("/v1/convert/csv-to-ndjson", &[file("a.csv", b"x\n1\n")])
        .await;
    let (status, _, body) = collect(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body.unwrap().to_vec()).unwrap().trim(), "{\"x\":1}");
}

/// Fails on the very first chunk.
struct FirstChunkFailingEngine;

impl ConversionEngine for FirstChunkFailingEngine {
    fn convert(&self, _source: &Path) -> Result<ChunkStream, ConversionError> {
        Ok(Box::new(std::iter::once(Err(ConversionError::Engine(
            "kaboom".to_string(),
        )))))
    }
}

#[tokio::test]
async fn test_single_source_first_chunk_failure_is_structured() {
    let app = TestApp::with_state(|state| {
        let registry = ConversionRegistry::new(OutputSettings::default())
            .with_engine(ConversionPair::CsvToNdjson, Arc::new(FirstChunkFailingEngine));
        state.with_registry(registry)
    });

    let response = app
        .post_multipart("/convert/csv-to-ndjson", &[file("solo.csv", b"x\n1\n")])
        .await;
    let (status, body) = json_body(response).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["code"], "conversion_failed");
    assert_eq!(body["detail"]["message"], "Failed to convert solo.csv: kaboom");
    assert!(app.leftovers().is_empty());
}

/// Emits one good chunk, then fails.
struct TruncatingEngine;

impl ConversionEngine for TruncatingEngine {
    fn convert(&self, _source: &Path) -> Result<ChunkStream, ConversionError> {
        let chunks: Vec<Result<Bytes, ConversionError>> = vec![
            Ok(Bytes::from_static(b"partial,")),
            Err(ConversionError::Engine("disk vanished".to_string())),
        ];
        Ok(Box::new(chunks.into_iter()))
    }
}

#[tokio::test]
async fn test_mid_stream_failure_truncates_body() {
    let app = TestApp::with_state(|state| {
        let registry = ConversionRegistry::new(OutputSettings::default())
            .with_engine(ConversionPair::CsvToNdjson, Arc::new(TruncatingEngine));
        state.with_registry(registry)
    });

    let response = app
        .post_multipart("/convert/csv-to-ndjson", &[file("a.csv", b"x\n1\n")])
        .await;
    let (status, _, body) = collect(response).await;

    // Headers were already committed; the failure shows up as a broken body
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_err());
    assert!(app.leftovers().is_empty());
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new();

    let request = axum::http::Request::builder()
        .uri("/health")
        .header("x-request-id", "abc-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.headers()["x-request-id"], "abc-123");
}
