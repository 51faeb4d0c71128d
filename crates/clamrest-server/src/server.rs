//! Router, route handlers and the listener loop.
//!
//! The clamd client is blocking, so every daemon call runs on tokio's
//! blocking pool. Uploads are relayed chunk by chunk from the multipart
//! body into the INSTREAM upload without buffering the whole file.

use std::future::Future;
use std::io::{self, Read};
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, OriginalUri, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use clamrest_clamd::{ClamdClient, ClamdError, RawResponse, ScanStatus};
use clamrest_config::AppConfig;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::types::{InfoResponse, PingResponse, ScanResponse};
use crate::{openapi, pages};

/// Path of the OpenAPI document.
pub const DOC_PATH: &str = "/api/v1/doc";

/// Chunks buffered between the request body and the upload to clamd.
const UPLOAD_QUEUE_DEPTH: usize = 8;

/// Shared state accessible to all route handlers.
pub struct AppState {
    pub client: Arc<ClamdClient>,
    pub include_raw_data: bool,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(client: ClamdClient, config: &AppConfig) -> Self {
        Self {
            client: Arc::new(client),
            include_raw_data: config.server.include_raw_data,
            max_upload_bytes: config.server.max_upload_bytes,
        }
    }

    /// Build the state and its clamd client from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ClamdError> {
        let client = ClamdClient::from_config(&config.clamd)?;
        Ok(Self::new(client, config))
    }

    /// Run a blocking client call on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&ClamdClient) -> Result<T, ClamdError> + Send + 'static,
        T: Send + 'static,
    {
        let client = Arc::clone(&self.client);
        Ok(tokio::task::spawn_blocking(move || f(&client)).await??)
    }
}

/// Build the axum router with all routes.
pub fn router(state: Arc<AppState>) -> axum::Router {
    let body_limit = state.max_upload_bytes;
    axum::Router::new()
        .route("/", get(handle_index))
        .route("/index.html", get(handle_index))
        .route("/swagger-ui", get(handle_swagger_ui))
        .route(DOC_PATH, get(handle_doc))
        .route("/health", get(handle_ping))
        .route("/api/v1/clamav/ping", get(handle_ping))
        .route("/api/v1/clamav/version", get(handle_version))
        .route("/api/v1/clamav/stats", get(handle_stats))
        .route(
            "/api/v1/clamav/scan",
            post(handle_scan).layer(DefaultBodyLimit::max(body_limit)),
        )
        .fallback(handle_not_found)
        .method_not_allowed_fallback(handle_method_not_allowed)
        .with_state(state)
}

/// Bind the listener described by `[server]`.
pub async fn bind(config: &AppConfig) -> io::Result<TcpListener> {
    let addr = (config.server.listen_addr.as_str(), config.server.listen_port);
    TcpListener::bind(addr).await
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        clamd = %state.client.endpoint(),
        "HTTP server listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("HTTP server shutting down");
        })
        .await
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_index(State(state): State<Arc<AppState>>) -> (StatusCode, Html<String>) {
    let pong = state.call(ClamdClient::ping).await;
    let version = state.call(ClamdClient::version).await;
    let stats = state.call(ClamdClient::stats).await;

    let code = if matches!(&pong, Ok(p) if p.message == "PONG") {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let page = pages::index(
        &message_or_error(pong),
        &message_or_error(version),
        &message_or_error(stats),
    );
    (code, Html(page))
}

fn message_or_error(reply: Result<RawResponse, ApiError>) -> String {
    match reply {
        Ok(reply) => reply.message,
        Err(e) => format!("error: {e}"),
    }
}

async fn handle_swagger_ui() -> Html<String> {
    Html(pages::swagger_ui(DOC_PATH))
}

async fn handle_doc() -> Json<Value> {
    Json(openapi::document())
}

async fn handle_ping(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<PingResponse>), ApiError> {
    debug!("pinging clamd");
    let pong = state.call(ClamdClient::ping).await?;
    debug!(raw = %pong.raw_text.escape_debug(), "ping reply");

    let (status, code) = if pong.message == "PONG" {
        ("OK", StatusCode::OK)
    } else {
        warn!(message = %pong.message, "clamd did not answer PONG");
        ("KO", StatusCode::SERVICE_UNAVAILABLE)
    };
    Ok((
        code,
        Json(PingResponse {
            status: status.to_string(),
            message: pong.message,
        }),
    ))
}

async fn handle_version(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InfoResponse>, ApiError> {
    let version = state.call(ClamdClient::version).await?;
    Ok(Json(InfoResponse {
        message: version.message,
        details: version.details,
    }))
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Result<Json<InfoResponse>, ApiError> {
    debug!("requesting clamd stats");
    let stats = state.call(ClamdClient::stats).await?;
    Ok(Json(InfoResponse {
        message: stats.message,
        details: stats.details,
    }))
}

async fn handle_scan(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!(%rejection, "scan request is not multipart");
        ApiError::NoFile
    })?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            return scan_upload(&state, field).await;
        }
    }
    Err(ApiError::NoFile)
}

/// Stream one multipart field to clamd and build the scan response.
async fn scan_upload(
    state: &AppState,
    mut field: Field<'_>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let filename = field.file_name().map(str::to_string);
    info!(file = filename.as_deref().unwrap_or(""), "starting scan");

    let (tx, rx) = mpsc::channel(UPLOAD_QUEUE_DEPTH);
    let client = Arc::clone(&state.client);
    let scan = tokio::task::spawn_blocking(move || {
        let mut body = BodyReader::new(rx);
        let result = client.scan_stream(&mut body);
        (result, body.bytes_read)
    });

    // Relay the upload. A closed channel means the scan already ended.
    let mut upload_error = None;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(io::Error::other(e.body_text()))).await;
                upload_error = Some(e);
                break;
            }
        }
    }
    drop(tx);

    let (result, file_size) = scan.await?;
    if let Some(e) = upload_error {
        return Err(e.into());
    }
    let result = result?;

    info!(
        file = filename.as_deref().unwrap_or(""),
        bytes = file_size,
        status = %result.status,
        virus = result.virus.as_deref().unwrap_or("no virus"),
        "scan finished"
    );
    debug!(raw = %result.raw_text().escape_debug(), "scan reply");

    let code = match result.status {
        ScanStatus::Ok | ScanStatus::Found => StatusCode::OK,
        ScanStatus::Error => {
            error!(error = result.error_message.as_deref().unwrap_or(""), "clamd reported an error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ScanStatus::ClientParseError => {
            error!(raw = %result.raw_text().escape_debug(), "unable to parse clamd reply");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let raw_data = if state.include_raw_data {
        warn!("including raw data in scan response, use this option only for debugging");
        Some(result.raw_text().to_string())
    } else {
        None
    };

    Ok((
        code,
        Json(ScanResponse {
            status: result.status,
            input_file: filename,
            virus: result.virus,
            details: result.response.details,
            error: result.error_message,
            file_size,
            raw_data,
        }),
    ))
}

async fn handle_not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

async fn handle_method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Blocking reader over body chunks sent from the async side.
struct BodyReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    bytes_read: u64,
}

impl BodyReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            bytes_read: 0,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current = self.current.slice(n..);
        self.bytes_read += n as u64;
        Ok(n)
    }
}
