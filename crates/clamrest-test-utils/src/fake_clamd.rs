//! An in-process stand-in for clamd.
//!
//! [`FakeClamd`] listens on a Unix socket in a temp directory or on a
//! localhost TCP port and speaks the daemon's wire protocol: `z`/`n`
//! prefixed commands, INSTREAM chunk uploads, and replies that end when the
//! connection is closed. Every request is recorded for assertions.
//!
//! By default it answers like a real daemon with an EICAR-only signature
//! database (see [`clamd_like`]); tests can script replies with
//! [`FakeClamd::builder`].

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use clamrest_config::ClamdConfig;
use tempfile::TempDir;
use tracing::debug;

/// The EICAR anti-virus test file.
pub const EICAR: &[u8] = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// Signature name reported for [`EICAR`].
pub const EICAR_SIGNATURE: &str = "Win.Test.EICAR_HDB-1";

/// Version string reported by `VERSION`.
pub const VERSION_REPLY: &str = "ClamAV 1.4.2/27500/Mon Jan  6 09:00:00 2025";

/// Body reported by `STATS`.
pub const STATS_REPLY: &str = "POOLS: 1\n\nSTATE: VALID PRIMARY\n\
THREADS: live 1  idle 0 max 10 idle-timeout 30\n\
QUEUE: 0 items\n\tSTATS 0.000036\n\n\
MEMSTATS: heap N/A mmap N/A used N/A free N/A releasable N/A pools 1 \
pools_used 1306.837M pools_total 1306.882M\nEND";

/// One request as seen by the fake daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRequest {
    /// `z` or `n`.
    pub specifier: u8,
    /// Command text without specifier or terminator.
    pub command: String,
    /// `\0` or `\n`.
    pub terminator: u8,
    /// INSTREAM payload chunks in arrival order.
    pub chunks: Vec<Vec<u8>>,
    /// Whether the zero-length chunk ending an upload was received.
    pub terminated: bool,
}

impl ReceivedRequest {
    /// All uploaded bytes.
    pub fn payload(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    /// `text` followed by this request's terminator, closing afterwards.
    pub fn reply(&self, text: &str) -> Reply {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(self.terminator);
        Reply::Close(bytes)
    }
}

/// What the fake daemon does after reading a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write the bytes, then close the connection.
    Close(Vec<u8>),
    /// Write the bytes and keep the connection open until the client
    /// gives up.
    Hang(Vec<u8>),
}

type Responder = dyn Fn(&ReceivedRequest) -> Reply + Send + Sync;

/// Answer like clamd with a database that only knows EICAR.
pub fn clamd_like(request: &ReceivedRequest) -> Reply {
    let command = request.command.as_str();
    if command == "PING" {
        return request.reply("PONG");
    }
    if command == "VERSION" {
        return request.reply(VERSION_REPLY);
    }
    if command == "STATS" {
        return request.reply(STATS_REPLY);
    }
    if command == "INSTREAM" {
        return request.reply(&scan_verdict("stream", &request.payload()));
    }
    if let Some(path) = command.strip_prefix("SCAN ") {
        let line = match std::fs::metadata(path) {
            Err(_) => {
                format!("{path}: File path check failure: No such file or directory. ERROR")
            }
            Ok(meta) if meta.is_dir() => format!("{path}: OK"),
            Ok(_) => match std::fs::read(path) {
                Ok(content) => scan_verdict(path, &content),
                Err(_) => format!("{path}: Access denied. ERROR"),
            },
        };
        return request.reply(&line);
    }
    request.reply("UNKNOWN COMMAND")
}

fn scan_verdict(name: &str, content: &[u8]) -> String {
    if content.windows(EICAR.len()).any(|w| w == EICAR) {
        format!("{name}: {EICAR_SIGNATURE} FOUND")
    } else {
        format!("{name}: OK")
    }
}

/// Configures a [`FakeClamd`] before it starts listening.
pub struct FakeClamdBuilder {
    responder: Arc<Responder>,
    stream_limit: Option<usize>,
}

impl FakeClamdBuilder {
    /// Replace the default [`clamd_like`] answers.
    pub fn responder(
        mut self,
        responder: impl Fn(&ReceivedRequest) -> Reply + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    /// Reject uploads larger than `bytes` the way clamd's `StreamMaxLength`
    /// does: reply with an error and close mid-upload.
    pub fn stream_limit(mut self, bytes: usize) -> Self {
        self.stream_limit = Some(bytes);
        self
    }

    /// Listen on a Unix socket in a fresh temp directory.
    pub fn spawn_unix(self) -> FakeClamd {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("clamd.sock");
        let listener = UnixListener::bind(&path).expect("failed to bind fake clamd socket");
        self.spawn(Listener::Unix(listener), Endpoint::Unix { path, _dir: dir })
    }

    /// Listen on an ephemeral localhost TCP port.
    pub fn spawn_tcp(self) -> FakeClamd {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind fake clamd port");
        let addr = listener.local_addr().expect("listener has no address");
        self.spawn(Listener::Tcp(listener), Endpoint::Tcp(addr))
    }

    fn spawn(self, listener: Listener, endpoint: Endpoint) -> FakeClamd {
        let shared = Arc::new(Shared {
            responder: self.responder,
            stream_limit: self.stream_limit,
            requests: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });
        let accept_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || accept_loop(listener, accept_shared));
        FakeClamd {
            endpoint,
            shared,
            handle: Some(handle),
        }
    }
}

/// A fake clamd daemon running on background threads.
///
/// Stops accepting connections when dropped.
pub struct FakeClamd {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

enum Endpoint {
    Unix { path: PathBuf, _dir: TempDir },
    Tcp(SocketAddr),
}

struct Shared {
    responder: Arc<Responder>,
    stream_limit: Option<usize>,
    requests: Mutex<Vec<ReceivedRequest>>,
    connections: AtomicUsize,
    shutdown: AtomicBool,
}

impl FakeClamd {
    pub fn builder() -> FakeClamdBuilder {
        FakeClamdBuilder {
            responder: Arc::new(clamd_like),
            stream_limit: None,
        }
    }

    /// A clamd-like daemon on a Unix socket.
    pub fn unix() -> Self {
        Self::builder().spawn_unix()
    }

    /// A clamd-like daemon on a TCP port.
    pub fn tcp() -> Self {
        Self::builder().spawn_tcp()
    }

    pub fn socket_path(&self) -> Option<&Path> {
        match &self.endpoint {
            Endpoint::Unix { path, .. } => Some(path),
            Endpoint::Tcp(_) => None,
        }
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self.endpoint {
            Endpoint::Unix { .. } => None,
            Endpoint::Tcp(addr) => Some(addr),
        }
    }

    /// A `[clamd]` section pointing at this daemon.
    pub fn clamd_config(&self) -> ClamdConfig {
        let mut config = ClamdConfig::default();
        match &self.endpoint {
            Endpoint::Unix { path, .. } => {
                config.socket_path = Some(path.display().to_string());
            }
            Endpoint::Tcp(addr) => {
                config.host = Some(addr.ip().to_string());
                config.port = Some(addr.port());
            }
        }
        config
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.shared
            .requests
            .lock()
            .expect("request log poisoned")
            .clone()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<ReceivedRequest> {
        self.requests().pop()
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeClamd {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Wake the accept loop so it sees the flag.
        let _ = match &self.endpoint {
            Endpoint::Unix { path, .. } => UnixStream::connect(path).map(drop),
            Endpoint::Tcp(addr) => TcpStream::connect(addr).map(drop),
        };
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

trait Duplex: Read + Write + Send {}

impl<T: Read + Write + Send> Duplex for T {}

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    fn accept(&self) -> io::Result<Box<dyn Duplex>> {
        match self {
            Listener::Unix(l) => l.accept().map(|(s, _)| Box::new(s) as Box<dyn Duplex>),
            Listener::Tcp(l) => l.accept().map(|(s, _)| Box::new(s) as Box<dyn Duplex>),
        }
    }
}

fn accept_loop(listener: Listener, shared: Arc<Shared>) {
    loop {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "fake clamd accept failed");
                continue;
            }
        };
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        shared.connections.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            if let Err(e) = serve_connection(stream, &shared) {
                debug!(error = %e, "fake clamd connection ended early");
            }
        });
    }
}

fn serve_connection(mut stream: Box<dyn Duplex>, shared: &Shared) -> io::Result<()> {
    let mut specifier = [0u8; 1];
    stream.read_exact(&mut specifier)?;
    let terminator = match specifier[0] {
        b'z' => b'\0',
        b'n' => b'\n',
        _ => {
            stream.write_all(b"UNKNOWN COMMAND\n")?;
            return Ok(());
        }
    };

    let command = read_until(stream.as_mut(), terminator)?;
    let mut request = ReceivedRequest {
        specifier: specifier[0],
        command,
        terminator,
        chunks: Vec::new(),
        terminated: false,
    };

    if request.command == "INSTREAM" {
        let mut total = 0usize;
        loop {
            let mut prefix = [0u8; 4];
            stream.read_exact(&mut prefix)?;
            let len = u32::from_be_bytes(prefix) as usize;
            if len == 0 {
                request.terminated = true;
                break;
            }
            total += len;
            if shared.stream_limit.is_some_and(|limit| total > limit) {
                let reply = request.reply("INSTREAM size limit exceeded. ERROR");
                record(shared, request);
                if let Reply::Close(bytes) = reply {
                    stream.write_all(&bytes)?;
                }
                // Close with the rest of the upload unread.
                return Ok(());
            }
            let mut chunk = vec![0u8; len];
            stream.read_exact(&mut chunk)?;
            request.chunks.push(chunk);
        }
    }

    let reply = (shared.responder)(&request);
    record(shared, request);
    match reply {
        Reply::Close(bytes) => stream.write_all(&bytes)?,
        Reply::Hang(bytes) => {
            stream.write_all(&bytes)?;
            stream.flush()?;
            // Hold the connection until the client closes it.
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink);
        }
    }
    Ok(())
}

fn read_until(stream: &mut dyn Duplex, terminator: u8) -> io::Result<String> {
    let mut text = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == terminator {
            break;
        }
        text.push(byte[0]);
    }
    String::from_utf8(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn record(shared: &Shared, request: ReceivedRequest) {
    debug!(command = %request.command, chunks = request.chunks.len(), "fake clamd request");
    shared
        .requests
        .lock()
        .expect("request log poisoned")
        .push(request);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(fake: &FakeClamd, request: &[u8]) -> Vec<u8> {
        let mut stream = UnixStream::connect(fake.socket_path().unwrap()).unwrap();
        stream.write_all(request).unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        reply
    }

    #[test]
    fn test_ping_and_record() {
        let fake = FakeClamd::unix();
        assert_eq!(exchange(&fake, b"zPING\0"), b"PONG\0");
        let request = fake.last_request().unwrap();
        assert_eq!(request.command, "PING");
        assert_eq!(request.specifier, b'z');
        assert_eq!(fake.connection_count(), 1);
    }

    #[test]
    fn test_instream_detects_eicar() {
        let fake = FakeClamd::unix();
        let mut upload = b"nINSTREAM\n".to_vec();
        upload.extend_from_slice(&(EICAR.len() as u32).to_be_bytes());
        upload.extend_from_slice(EICAR);
        upload.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            exchange(&fake, &upload),
            b"stream: Win.Test.EICAR_HDB-1 FOUND\n"
        );
        let request = fake.last_request().unwrap();
        assert!(request.terminated);
        assert_eq!(request.payload(), EICAR);
    }

    #[test]
    fn test_scripted_responder() {
        let fake = FakeClamd::builder()
            .responder(|r| Reply::Close(format!("echo {}", r.command).into_bytes()))
            .spawn_unix();
        assert_eq!(exchange(&fake, b"zSTATS\0"), b"echo STATS");
    }
}
