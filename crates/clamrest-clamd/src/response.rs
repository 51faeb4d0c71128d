//! Parsing of clamd replies.
//!
//! Every reply is a terminator-delimited text stream. Scan commands put a
//! status line first: `<path>: [<text>] (OK|FOUND|ERROR)`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClamdError;
use crate::protocol::Terminator;

/// Error message attached to replies whose status line cannot be parsed.
pub const PARSE_ERROR_MESSAGE: &str = "Unable to parse daemon response";

/// What clamd replies when an INSTREAM upload exceeds `StreamMaxLength`.
pub const STREAM_LIMIT_MESSAGE: &str = "INSTREAM size limit exceeded";

static SCAN_STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?):\s+(.+)?\s?(OK|FOUND|ERROR)$").expect("scan status regex is valid")
});

/// Decode raw reply bytes as UTF-8.
pub fn decode(raw: Vec<u8>) -> Result<String, ClamdError> {
    Ok(String::from_utf8(raw)?)
}

/// A generic clamd reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// The reply exactly as received.
    pub raw_text: String,
    /// First terminator-delimited segment.
    pub message: String,
    /// Remaining non-empty segments, in order.
    pub details: Vec<String>,
}

impl RawResponse {
    /// Split `raw_text` on the session terminator.
    pub fn parse(raw_text: String, terminator: Terminator) -> Self {
        let mut segments = raw_text.split(terminator.as_char());
        let message = segments.next().unwrap_or_default().to_string();
        let details = segments
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw_text,
            message,
            details,
        }
    }

    /// Whether clamd refused an upload for exceeding its stream limit.
    pub fn is_stream_limit_exceeded(&self) -> bool {
        self.message.contains(STREAM_LIMIT_MESSAGE)
    }
}

impl fmt::Display for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw_text)
    }
}

/// Outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Ok,
    Found,
    Error,
    /// Produced by this client when the status line is unparseable. Never
    /// sent by clamd.
    ClientParseError,
}

impl ScanStatus {
    /// Map a status token from a scan reply. `CLIENT_PARSE_ERROR` is never
    /// a daemon token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "OK" => Some(ScanStatus::Ok),
            "FOUND" => Some(ScanStatus::Found),
            "ERROR" => Some(ScanStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Ok => "OK",
            ScanStatus::Found => "FOUND",
            ScanStatus::Error => "ERROR",
            ScanStatus::ClientParseError => "CLIENT_PARSE_ERROR",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply to `SCAN` or `INSTREAM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(flatten)]
    pub response: RawResponse,
    /// Path reported by clamd; `stream` for INSTREAM.
    pub input_file: Option<String>,
    pub status: ScanStatus,
    /// Signature name, set only when `status` is `Found`.
    pub virus: Option<String>,
    /// Set when `status` is `Error` or `ClientParseError`.
    pub error_message: Option<String>,
}

impl ScanResult {
    /// Parse a scan reply. Never fails: an unrecognised status line yields
    /// [`ScanStatus::ClientParseError`] with the raw text preserved.
    pub fn parse(raw_text: String, terminator: Terminator) -> Self {
        let response = RawResponse::parse(raw_text, terminator);

        let parsed = SCAN_STATUS_LINE
            .captures(&response.message)
            .and_then(|caps| Some((caps.get(1)?, caps.get(2), ScanStatus::from_token(&caps[3])?)))
            .map(|(file, text, status)| {
                let text = text.map(|m| m.as_str().trim().to_string()).unwrap_or_default();
                (file.as_str().to_string(), text, status)
            });

        let Some((input_file, text, status)) = parsed else {
            return Self {
                response,
                input_file: None,
                status: ScanStatus::ClientParseError,
                virus: None,
                error_message: Some(PARSE_ERROR_MESSAGE.to_string()),
            };
        };

        let (virus, error_message) = match status {
            ScanStatus::Ok => (None, None),
            ScanStatus::Found => (Some(text), None),
            ScanStatus::Error => (None, Some(text)),
            ScanStatus::ClientParseError => (None, Some(PARSE_ERROR_MESSAGE.to_string())),
        };

        Self {
            response,
            input_file: Some(input_file),
            status,
            virus,
            error_message,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.status == ScanStatus::Ok
    }

    pub fn is_infected(&self) -> bool {
        self.status == ScanStatus::Found
    }

    pub fn raw_text(&self) -> &str {
        &self.response.raw_text
    }

    pub fn message(&self) -> &str {
        &self.response.message
    }

    pub fn details(&self) -> &[String] {
        &self.response.details
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.response.raw_text)
    }
}
