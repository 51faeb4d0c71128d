//! The clamd client.
//!
//! Every operation opens its own connection, sends one command, reads until
//! clamd closes the connection and parses the reply:
//!
//! ```text
//! Idle ──connect──▶ Connected ──send──▶ AwaitingResponse ──recv──▶ Closed
//!                       │                     │
//!                       └────── error ────────┴──────────────────▶ Closed
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use clamrest_config::{ClamdConfig, ClamdEndpoint};

use crate::error::{ClamdError, is_peer_closed};
use crate::instream::{LENGTH_PREFIX_LEN, write_instream};
use crate::protocol::{Command, Terminator, frame};
use crate::response::{RawResponse, ScanResult, decode};
use crate::transport::{TcpTransport, Transport, UnixTransport};

/// Default connect/read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default buffer size for Unix socket connections.
pub const DEFAULT_UNIX_BUFFER_SIZE: usize = 2048;

/// Default buffer size for TCP connections.
pub const DEFAULT_TCP_BUFFER_SIZE: usize = 1024;

/// Options shared by both transports.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub terminator: Terminator,
    /// Read buffer and upload chunk size (prefix included). `None` picks the
    /// transport default.
    pub buffer_size: Option<usize>,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            terminator: Terminator::default(),
            buffer_size: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientOptions {
    pub fn with_terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Client for the clamd daemon.
///
/// Holds no connection between calls, so a single client can be shared
/// across threads.
pub struct ClamdClient {
    transport: Box<dyn Transport>,
    terminator: Terminator,
    buffer_size: usize,
}

impl ClamdClient {
    /// Create a client over an arbitrary transport.
    pub fn new(
        transport: Box<dyn Transport>,
        terminator: Terminator,
        buffer_size: usize,
    ) -> Result<Self, ClamdError> {
        if buffer_size <= LENGTH_PREFIX_LEN {
            return Err(ClamdError::InvalidBufferSize(buffer_size));
        }
        if transport.timeout().is_zero() {
            return Err(ClamdError::InvalidTimeout);
        }
        Ok(Self {
            transport,
            terminator,
            buffer_size,
        })
    }

    /// Client for clamd on a local Unix socket.
    pub fn unix(path: impl Into<PathBuf>, options: ClientOptions) -> Result<Self, ClamdError> {
        let transport = UnixTransport::new(path, options.timeout);
        Self::new(
            Box::new(transport),
            options.terminator,
            options.buffer_size.unwrap_or(DEFAULT_UNIX_BUFFER_SIZE),
        )
    }

    /// Client for clamd over TCP.
    pub fn tcp(
        host: impl Into<String>,
        port: u16,
        options: ClientOptions,
    ) -> Result<Self, ClamdError> {
        let transport = TcpTransport::new(host, port, options.timeout);
        Self::new(
            Box::new(transport),
            options.terminator,
            options.buffer_size.unwrap_or(DEFAULT_TCP_BUFFER_SIZE),
        )
    }

    /// Build a client from the `[clamd]` configuration section.
    pub fn from_config(config: &ClamdConfig) -> Result<Self, ClamdError> {
        let options = ClientOptions {
            terminator: config.terminator.parse()?,
            buffer_size: config.buffer_size,
            timeout: config.timeout(),
        };
        match config.endpoint() {
            ClamdEndpoint::Unix(path) => Self::unix(path, options),
            ClamdEndpoint::Tcp { host, port } => Self::tcp(host, port, options),
        }
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// `PING`: check the daemon is alive. A healthy daemon answers `PONG`.
    pub fn ping(&self) -> Result<RawResponse, ClamdError> {
        self.simple_command(Command::Ping)
    }

    /// `VERSION`: program and signature database versions.
    pub fn version(&self) -> Result<RawResponse, ClamdError> {
        self.simple_command(Command::Version)
    }

    /// `STATS`: scan queue, thread pool and memory statistics.
    pub fn stats(&self) -> Result<RawResponse, ClamdError> {
        self.simple_command(Command::Stats)
    }

    /// `SCAN`: scan a file or directory on the daemon's filesystem.
    ///
    /// clamd needs an absolute path; relative paths are resolved by the
    /// daemon against its own working directory. Paths that are not UTF-8
    /// or that contain a terminator byte cannot be framed and are rejected.
    pub fn scan_path(&self, path: impl AsRef<Path>) -> Result<ScanResult, ClamdError> {
        let path = path.as_ref();
        let invalid = |reason| ClamdError::InvalidScanPath {
            path: path.to_path_buf(),
            reason,
        };
        let text = path.to_str().ok_or_else(|| invalid("not valid UTF-8"))?;
        if text.contains(['\0', self.terminator.as_char()]) {
            return Err(invalid("contains a command terminator"));
        }
        let command = Command::Scan(path);
        let raw = self.round_trip(&command, None)?;
        Ok(ScanResult::parse(raw, self.terminator))
    }

    /// `INSTREAM`: upload `source` on the command's connection and scan it.
    pub fn scan_stream<R: Read>(&self, mut source: R) -> Result<ScanResult, ClamdError> {
        let raw = self.round_trip(&Command::Instream, Some(&mut source))?;
        Ok(ScanResult::parse(raw, self.terminator))
    }

    fn simple_command(&self, command: Command<'_>) -> Result<RawResponse, ClamdError> {
        let raw = self.round_trip(&command, None)?;
        Ok(RawResponse::parse(raw, self.terminator))
    }

    /// Run one command/response cycle on a fresh connection.
    fn round_trip(
        &self,
        command: &Command<'_>,
        upload: Option<&mut dyn Read>,
    ) -> Result<String, ClamdError> {
        let started = Instant::now();
        let framed = frame(&command.text(), self.terminator);
        debug!(endpoint = %self.endpoint(), command = %command.text(), "clamd request");
        trace!(frame = ?framed, "sending command frame");

        // Dropping `conn` on any early return closes the socket.
        let mut conn = self.transport.connect()?;
        conn.send(framed.as_bytes())?;

        let mut uploaded = None;
        if let Some(source) = upload {
            match write_instream(source, conn.stream_mut(), self.buffer_size) {
                Ok(sent) => {
                    debug!(bytes = sent, "streamed content to clamd");
                    uploaded = Some(sent);
                }
                Err(ClamdError::UploadRejected { sent, source, .. }) => {
                    let reply = conn.receive_available(self.buffer_size);
                    return Err(self.upload_rejected(sent, reply, source));
                }
                Err(ClamdError::Io(e)) => return Err(ClamdError::from_io(e, conn.timeout())),
                Err(e) => return Err(e),
            }
        }

        conn.finish_request()?;
        // An upload that fit in the socket buffers is only refused once
        // clamd resets the connection with the rest left unread.
        let raw = match (conn.receive_partial(self.buffer_size), uploaded) {
            ((raw, None), _) => raw,
            ((raw, Some(e)), Some(sent)) if is_peer_closed(&e) => {
                return Err(self.upload_rejected(sent, raw, e));
            }
            ((_, Some(e)), _) => return Err(ClamdError::from_io(e, conn.timeout())),
        };
        conn.close();

        debug!(
            bytes = raw.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "clamd reply received"
        );
        let text = decode(raw)?;
        if let Some(sent) = uploaded
            && RawResponse::parse(text.clone(), self.terminator).is_stream_limit_exceeded()
        {
            let source = io::Error::new(io::ErrorKind::ConnectionAborted, "upload refused by clamd");
            return Err(self.upload_rejected(sent, text.into_bytes(), source));
        }
        Ok(text)
    }

    /// Build [`ClamdError::UploadRejected`] from whatever clamd said before
    /// dropping the upload.
    fn upload_rejected(&self, sent: u64, reply: Vec<u8>, source: io::Error) -> ClamdError {
        let daemon_reply = decode(reply)
            .ok()
            .map(|raw| RawResponse::parse(raw, self.terminator).message)
            .filter(|message| !message.is_empty());
        warn!(
            bytes = sent,
            reply = daemon_reply.as_deref().unwrap_or(""),
            "clamd refused the upload"
        );
        ClamdError::UploadRejected {
            sent,
            daemon_reply,
            source,
        }
    }
}

impl std::fmt::Debug for ClamdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClamdClient")
            .field("endpoint", &self.transport.endpoint())
            .field("terminator", &self.terminator)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}
