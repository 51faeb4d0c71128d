//! JSON bodies of the HTTP API.

use clamrest_clamd::ScanStatus;
use serde::{Deserialize, Serialize};

/// Reply to `/health` and `/api/v1/clamav/ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// `OK` when clamd answered `PONG`, `KO` otherwise.
    pub status: String,
    pub message: String,
}

/// Reply to `/api/v1/clamav/version` and `/api/v1/clamav/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub message: String,
    pub details: Vec<String>,
}

/// Reply to `/api/v1/clamav/scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub status: ScanStatus,
    /// Filename given by the uploader. clamd itself only reports `stream`.
    pub input_file: Option<String>,
    pub virus: Option<String>,
    pub details: Vec<String>,
    pub error: Option<String>,
    pub file_size: u64,
    /// clamd's reply verbatim, when `server.include_raw_data` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
