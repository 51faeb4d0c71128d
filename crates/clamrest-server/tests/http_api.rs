//! Router tests against the fake clamd daemon.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use clamrest_clamd::{ClamdClient, ClientOptions, ScanStatus};
use clamrest_server::{AppState, ErrorResponse, InfoResponse, PingResponse, ScanResponse, router};
use clamrest_test_utils::config::TestConfigBuilder;
use clamrest_test_utils::fake_clamd::{EICAR_SIGNATURE, VERSION_REPLY};
use clamrest_test_utils::{EICAR, FakeClamd, Reply};
use pretty_assertions::assert_eq;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

const BOUNDARY: &str = "clamrest-test-boundary";

fn app(fake: &FakeClamd) -> axum::Router {
    app_with(fake, TestConfigBuilder::new())
}

fn app_with(fake: &FakeClamd, builder: TestConfigBuilder) -> axum::Router {
    let config = builder.clamd_socket(fake.socket_path().unwrap()).build();
    router(Arc::new(AppState::from_config(&config).unwrap()))
}

fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn scan_request(body: Vec<u8>) -> Request<Body> {
    Request::post("/api/v1/clamav/scan")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json<T: DeserializeOwned>(resp: Response) -> T {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn get(app: axum::Router, uri: &str) -> Response {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    app.oneshot(req).await.unwrap()
}

#[test_log::test(tokio::test)]
async fn ping_and_health_report_ok() {
    let fake = FakeClamd::unix();
    for uri in ["/api/v1/clamav/ping", "/health"] {
        let resp = get(app(&fake), uri).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let ping: PingResponse = json(resp).await;
        assert_eq!(ping.status, "OK");
        assert_eq!(ping.message, "PONG");
    }
}

#[test_log::test(tokio::test)]
async fn ping_without_pong_is_unavailable() {
    let fake = FakeClamd::builder()
        .responder(|r| r.reply("LOADING"))
        .spawn_unix();
    let resp = get(app(&fake), "/health").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let ping: PingResponse = json(resp).await;
    assert_eq!(ping.status, "KO");
    assert_eq!(ping.message, "LOADING");
}

#[test_log::test(tokio::test)]
async fn unreachable_daemon_is_unavailable() {
    let dir = tempfile::TempDir::new().unwrap();
    let client =
        ClamdClient::unix(dir.path().join("clamd.sock"), ClientOptions::default()).unwrap();
    let state = AppState::new(client, &TestConfigBuilder::new().build());
    let resp = get(router(Arc::new(state)), "/api/v1/clamav/ping").await;

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let err: ErrorResponse = json(resp).await;
    assert!(err.error.contains("Is clamd running?"), "{}", err.error);
}

#[test_log::test(tokio::test)]
async fn version_and_stats() {
    let fake = FakeClamd::unix();

    let resp = get(app(&fake), "/api/v1/clamav/version").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let version: InfoResponse = json(resp).await;
    assert_eq!(version.message, VERSION_REPLY);
    assert!(version.details.is_empty());

    let resp = get(app(&fake), "/api/v1/clamav/stats").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stats: InfoResponse = json(resp).await;
    assert!(stats.message.starts_with("POOLS: "));
    assert!(stats.message.ends_with("END"));
}

#[test_log::test(tokio::test)]
async fn scan_clean_file() {
    let fake = FakeClamd::unix();
    let content = b"just a text file\n";
    let resp = app(&fake)
        .oneshot(scan_request(multipart_body("file", "testfile.txt", content)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let scan: ScanResponse = json(resp).await;
    assert_eq!(scan.status, ScanStatus::Ok);
    assert_eq!(scan.input_file.as_deref(), Some("testfile.txt"));
    assert_eq!(scan.virus, None);
    assert_eq!(scan.error, None);
    assert!(scan.details.is_empty());
    assert_eq!(scan.file_size, content.len() as u64);
    assert_eq!(scan.raw_data, None);
    assert_eq!(fake.last_request().unwrap().payload(), content);
}

#[test_log::test(tokio::test)]
async fn scan_infected_file() {
    let fake = FakeClamd::unix();
    let resp = app(&fake)
        .oneshot(scan_request(multipart_body("file", "infected", EICAR)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "FOUND");
    assert_eq!(value["virus"], EICAR_SIGNATURE);
    assert_eq!(value["input_file"], "infected");
    assert!(value.get("raw_data").is_none());
}

#[test_log::test(tokio::test)]
async fn scan_includes_raw_data_when_enabled() {
    let fake = FakeClamd::unix();
    let app = app_with(&fake, TestConfigBuilder::new().include_raw_data(true));
    let resp = app
        .oneshot(scan_request(multipart_body("file", "a.bin", b"abc")))
        .await
        .unwrap();

    let scan: ScanResponse = json(resp).await;
    assert_eq!(scan.raw_data.as_deref(), Some("stream: OK\0"));
}

#[test_log::test(tokio::test)]
async fn scan_without_file_field_is_bad_request() {
    let fake = FakeClamd::unix();
    let resp = app(&fake)
        .oneshot(scan_request(multipart_body("other", "a.txt", b"abc")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err: ErrorResponse = json(resp).await;
    assert_eq!(err.error, "No file attached");

    let req = Request::post("/api/v1/clamav/scan")
        .body(Body::empty())
        .unwrap();
    let resp = app(&fake).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(fake.requests().is_empty());
}

#[test_log::test(tokio::test)]
async fn daemon_error_is_server_error() {
    let fake = FakeClamd::builder()
        .responder(|r| r.reply("stream: Can't allocate memory ERROR"))
        .spawn_unix();
    let resp = app(&fake)
        .oneshot(scan_request(multipart_body("file", "a.txt", b"abc")))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let scan: ScanResponse = json(resp).await;
    assert_eq!(scan.status, ScanStatus::Error);
    assert_eq!(scan.error.as_deref(), Some("Can't allocate memory"));
}

#[test_log::test(tokio::test)]
async fn unparseable_reply_is_server_error() {
    let fake = FakeClamd::builder()
        .responder(|_| Reply::Close(b"???\0".to_vec()))
        .spawn_unix();
    let resp = app(&fake)
        .oneshot(scan_request(multipart_body("file", "a.txt", b"abc")))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let scan: ScanResponse = json(resp).await;
    assert_eq!(scan.status, ScanStatus::ClientParseError);
    assert_eq!(scan.input_file.as_deref(), Some("a.txt"));
}

#[test_log::test(tokio::test)]
async fn daemon_stream_limit_is_payload_too_large() {
    let fake = FakeClamd::builder().stream_limit(16 * 1024).spawn_unix();
    let content = vec![b'x'; 4 * 1024 * 1024];
    let resp = app(&fake)
        .oneshot(scan_request(multipart_body("file", "big.bin", &content)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let err: ErrorResponse = json(resp).await;
    assert!(err.error.contains("INSTREAM size limit exceeded"), "{}", err.error);
}

#[test_log::test(tokio::test)]
async fn small_upload_over_stream_limit_is_payload_too_large() {
    let fake = FakeClamd::builder().stream_limit(16).spawn_unix();
    let resp = app(&fake)
        .oneshot(scan_request(multipart_body("file", "small.bin", &[b'A'; 100])))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let err: ErrorResponse = json(resp).await;
    assert!(err.error.contains("INSTREAM size limit exceeded"), "{}", err.error);
}

#[test_log::test(tokio::test)]
async fn body_over_upload_limit_is_rejected() {
    let fake = FakeClamd::unix();
    let app = app_with(&fake, TestConfigBuilder::new().max_upload_bytes(1024));
    let resp = app
        .oneshot(scan_request(multipart_body("file", "big.bin", &[0u8; 8192])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[test_log::test(tokio::test)]
async fn index_page_shows_daemon_status() {
    let fake = FakeClamd::unix();
    let resp = get(app(&fake), "/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("PONG"));
    assert!(html.contains(VERSION_REPLY));
    assert!(html.contains("POOLS: 1"));

    let resp = get(app(&fake), "/index.html").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[test_log::test(tokio::test)]
async fn index_page_unhealthy_daemon() {
    let fake = FakeClamd::builder()
        .responder(|r| r.reply("LOADING"))
        .spawn_unix();
    let resp = get(app(&fake), "/").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test_log::test(tokio::test)]
async fn openapi_document_and_swagger_ui() {
    let fake = FakeClamd::unix();
    let resp = get(app(&fake), "/api/v1/doc").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let doc: serde_json::Value = json(resp).await;
    assert_eq!(doc["info"]["title"], "ClamAV REST service");
    assert!(doc["paths"]["/api/v1/clamav/scan"]["post"].is_object());

    let resp = get(app(&fake), "/swagger-ui").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[test_log::test(tokio::test)]
async fn unknown_route_is_json_not_found() {
    let fake = FakeClamd::unix();
    let resp = get(app(&fake), "/api/v2/nothing").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let err: ErrorResponse = json(resp).await;
    assert!(err.error.contains("/api/v2/nothing"));

    let resp = get(app(&fake), "/api/v1/clamav/scan").await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}
