//! Errors raised while talking to clamd.
//!
//! Hard failures only. A scan reply that cannot be parsed is not an error:
//! it comes back as [`ScanStatus::ClientParseError`](crate::ScanStatus).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Errors from the clamd client.
#[derive(Debug, thiserror::Error)]
pub enum ClamdError {
    #[error("unsupported command terminator {0:?}: expected NUL (\\0) or newline (\\n)")]
    UnsupportedTerminator(String),

    #[error("buffer size must be greater than 4 bytes, got {0}")]
    InvalidBufferSize(usize),

    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    #[error("cannot send path {} to clamd: {reason}", .path.display())]
    InvalidScanPath {
        path: PathBuf,
        reason: &'static str,
    },

    #[error("daemon socket not found at {}. Is clamd running?", .0.display())]
    SocketNotFound(PathBuf),

    #[error("failed to connect to clamd at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: io::Error,
    },

    #[error("timed out after {0:?} waiting for clamd")]
    Timeout(Duration),

    #[error(
        "clamd closed the connection after {sent} bytes of upload{}",
        .daemon_reply.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
    )]
    UploadRejected {
        sent: u64,
        daemon_reply: Option<String>,
        source: io::Error,
    },

    #[error("failed to read upload source: {0}")]
    SourceRead(io::Error),

    #[error("clamd response is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("IO error talking to clamd: {0}")]
    Io(#[from] io::Error),
}

impl ClamdError {
    /// Whether the client was misconfigured. These fail at construction.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ClamdError::UnsupportedTerminator(_)
                | ClamdError::InvalidBufferSize(_)
                | ClamdError::InvalidTimeout
        )
    }

    /// Whether the daemon could not be reached or did not answer in time.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClamdError::SocketNotFound(_) | ClamdError::Connect { .. } | ClamdError::Timeout(_)
        )
    }

    /// Classify an I/O error raised on an established connection.
    pub(crate) fn from_io(err: io::Error, timeout: Duration) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClamdError::Timeout(timeout),
            _ => ClamdError::Io(err),
        }
    }
}

/// Whether an I/O error means the peer already closed its end.
pub(crate) fn is_peer_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_socket_not_found_display() {
        let err = ClamdError::SocketNotFound(PathBuf::from("/tmp/clamd.sock"));
        assert_eq!(
            err.to_string(),
            "daemon socket not found at /tmp/clamd.sock. Is clamd running?"
        );
        assert!(err.is_connection_error());
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_upload_rejected_display_includes_reply() {
        let err = ClamdError::UploadRejected {
            sent: 4096,
            daemon_reply: Some("INSTREAM size limit exceeded. ERROR".to_string()),
            source: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert_eq!(
            err.to_string(),
            "clamd closed the connection after 4096 bytes of upload \
             (INSTREAM size limit exceeded. ERROR)"
        );
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_upload_rejected_display_without_reply() {
        let err = ClamdError::UploadRejected {
            sent: 0,
            daemon_reply: None,
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert_eq!(
            err.to_string(),
            "clamd closed the connection after 0 bytes of upload"
        );
    }

    #[test]
    fn test_from_io_maps_timeouts() {
        let timeout = Duration::from_secs(5);
        let err = ClamdError::from_io(io::Error::from(io::ErrorKind::WouldBlock), timeout);
        assert!(matches!(err, ClamdError::Timeout(t) if t == timeout));
        let err = ClamdError::from_io(io::Error::from(io::ErrorKind::Other), timeout);
        assert!(matches!(err, ClamdError::Io(_)));
    }

    #[test]
    fn test_peer_closed_kinds() {
        assert!(is_peer_closed(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_peer_closed(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_peer_closed(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(ClamdError::InvalidBufferSize(4).is_configuration_error());
        assert!(ClamdError::UnsupportedTerminator("\r".to_string()).is_configuration_error());
        assert!(ClamdError::InvalidTimeout.is_configuration_error());
        assert!(!ClamdError::InvalidTimeout.is_connection_error());
    }
}
