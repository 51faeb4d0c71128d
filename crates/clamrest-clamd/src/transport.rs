//! Socket transports to clamd.
//!
//! A [`Transport`] knows how to reach the daemon; each call to
//! [`Transport::connect`] yields a fresh [`Connection`] that carries exactly
//! one command/response cycle and is shut down when closed or dropped.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::error::ClamdError;

/// A way of opening connections to clamd.
pub trait Transport: Send + Sync {
    /// Open a new connection with the transport's timeouts applied.
    fn connect(&self) -> Result<Connection, ClamdError>;

    /// Human-readable endpoint, for logs and errors.
    fn endpoint(&self) -> String;

    /// Timeout applied to connect, reads and writes.
    fn timeout(&self) -> Duration;
}

/// A duplex byte stream that can be shut down from a shared reference.
pub trait DaemonStream: Read + Write + Send {
    fn shutdown(&self) -> io::Result<()>;
}

impl DaemonStream for UnixStream {
    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

impl DaemonStream for TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Transport over the clamd Unix socket (`LocalSocket` in clamd.conf).
///
/// Connecting to a local socket does not block, so the timeout only applies
/// to reads and writes.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    path: PathBuf,
    timeout: Duration,
}

impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Transport for UnixTransport {
    fn connect(&self) -> Result<Connection, ClamdError> {
        let stream = UnixStream::connect(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ClamdError::SocketNotFound(self.path.clone()),
            _ => ClamdError::Connect {
                endpoint: self.endpoint(),
                source: e,
            },
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(Connection::new(Box::new(stream), self.timeout))
    }

    fn endpoint(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Transport over TCP (`TCPSocket` in clamd.conf).
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> Result<Connection, ClamdError> {
        let connect_err = |source: io::Error| ClamdError::Connect {
            endpoint: self.endpoint(),
            source,
        };

        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(connect_err)?;

        // Try every resolved address, keep the last failure.
        let mut last_err = io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", self.host),
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(Connection::new(Box::new(stream), self.timeout));
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut) => {
                    return Err(ClamdError::Timeout(self.timeout));
                }
                Err(e) => {
                    trace!(%addr, error = %e, "TCP connect attempt failed");
                    last_err = e;
                }
            }
        }
        Err(connect_err(last_err))
    }

    fn endpoint(&self) -> String {
        format!("tcp:{}:{}", self.host, self.port)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Where a connection is in its single command/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Connected,
    AwaitingResponse,
    Closed,
}

/// A single-use connection to clamd.
///
/// Dropping a connection shuts the socket down, so it is released on every
/// exit path.
pub struct Connection {
    stream: Box<dyn DaemonStream>,
    timeout: Duration,
    state: CallState,
}

impl Connection {
    /// Wrap an already connected stream.
    pub fn new(stream: Box<dyn DaemonStream>, timeout: Duration) -> Self {
        trace!("connection state: Idle -> Connected");
        Self {
            stream,
            timeout,
            state: CallState::Connected,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Write all of `bytes` to the daemon.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ClamdError> {
        self.stream
            .write_all(bytes)
            .map_err(|e| ClamdError::from_io(e, self.timeout))
    }

    /// Mark the request as fully sent.
    pub fn finish_request(&mut self) -> Result<(), ClamdError> {
        self.stream
            .flush()
            .map_err(|e| ClamdError::from_io(e, self.timeout))?;
        self.transition(CallState::AwaitingResponse);
        Ok(())
    }

    /// Read until clamd closes its end of the connection.
    ///
    /// clamd has no end-of-reply marker; closing the connection is the
    /// only completion signal.
    pub fn receive_until_closed(&mut self, buffer_size: usize) -> Result<Vec<u8>, ClamdError> {
        match self.receive_partial(buffer_size) {
            (received, None) => Ok(received),
            (_, Some(e)) => Err(ClamdError::from_io(e, self.timeout)),
        }
    }

    /// Best-effort read of whatever the daemon sent before going away.
    ///
    /// A peer that closes with unread input may reset the connection after
    /// its last bytes; anything received before the error is kept.
    pub fn receive_available(&mut self, buffer_size: usize) -> Vec<u8> {
        let (received, err) = self.receive_partial(buffer_size);
        if let Some(e) = err {
            trace!(error = %e, bytes = received.len(), "reply read ended early");
        }
        received
    }

    /// Read until close, returning the bytes received so far together with
    /// the error that ended the read, if any.
    pub(crate) fn receive_partial(&mut self, buffer_size: usize) -> (Vec<u8>, Option<io::Error>) {
        let mut received = Vec::new();
        let mut buf = vec![0u8; buffer_size];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return (received, Some(e)),
            }
        }
        trace!(bytes = received.len(), "received daemon reply");
        (received, None)
    }

    /// Shut the connection down. Equivalent to dropping it.
    pub fn close(self) {}

    /// Mutable access to the underlying stream, for the upload sub-protocol.
    pub(crate) fn stream_mut(&mut self) -> &mut dyn DaemonStream {
        self.stream.as_mut()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    fn transition(&mut self, next: CallState) {
        trace!(from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state == CallState::Closed {
            return;
        }
        // The daemon usually closed first, so NotConnected is expected here.
        if let Err(e) = self.stream.shutdown()
            && e.kind() != io::ErrorKind::NotConnected
        {
            trace!(error = %e, "socket shutdown failed");
        }
        self.transition(CallState::Closed);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
