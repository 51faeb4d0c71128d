#![deny(unsafe_code)]

//! Blocking client for the clamd antivirus daemon.
//!
//! The client talks clamd's framed command protocol over a Unix socket or
//! TCP. Each operation uses a fresh connection that is closed when the
//! daemon has answered:
//!
//! ```no_run
//! use clamrest_clamd::{ClamdClient, ClientOptions};
//!
//! let client = ClamdClient::unix("/run/clamav/clamd.ctl", ClientOptions::default())?;
//! assert_eq!(client.ping()?.message, "PONG");
//!
//! let result = client.scan_stream(&b"hello"[..])?;
//! println!("{}: {}", result.status, result.message());
//! # Ok::<(), clamrest_clamd::ClamdError>(())
//! ```
//!
//! Session mode (`IDSESSION`/`END`) is not supported.

pub mod client;
pub mod error;
pub mod instream;
pub mod protocol;
pub mod response;
pub mod transport;

pub use client::{
    ClamdClient, ClientOptions, DEFAULT_TCP_BUFFER_SIZE, DEFAULT_TIMEOUT,
    DEFAULT_UNIX_BUFFER_SIZE,
};
pub use error::ClamdError;
pub use protocol::{Command, CommandFrame, Terminator, frame};
pub use response::{
    PARSE_ERROR_MESSAGE, RawResponse, STREAM_LIMIT_MESSAGE, ScanResult, ScanStatus,
};
pub use transport::{CallState, Connection, DaemonStream, TcpTransport, Transport, UnixTransport};
