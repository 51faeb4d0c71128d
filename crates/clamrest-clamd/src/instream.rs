//! The INSTREAM upload sub-protocol.
//!
//! After the `INSTREAM` command frame, content is sent on the same
//! connection as `[4B length_be][payload]` chunks and terminated by a zero
//! length. clamd closes the connection early when the upload exceeds its
//! `StreamMaxLength`; that surfaces as [`ClamdError::UploadRejected`].

use std::io::{self, Read, Write};

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::error::{ClamdError, is_peer_closed};

/// Size of the big-endian chunk length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Stream `source` to `sink` as length-prefixed chunks and send the
/// terminating zero-length chunk.
///
/// Each chunk carries at most `buffer_size - 4` payload bytes so prefix and
/// payload go out in one write of at most `buffer_size` bytes. Returns the
/// number of payload bytes sent.
pub fn write_instream<R, W>(
    source: &mut R,
    sink: &mut W,
    buffer_size: usize,
) -> Result<u64, ClamdError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    if buffer_size <= LENGTH_PREFIX_LEN {
        return Err(ClamdError::InvalidBufferSize(buffer_size));
    }

    let mut payload = vec![0u8; buffer_size - LENGTH_PREFIX_LEN];
    let mut frame = BytesMut::with_capacity(buffer_size);
    let mut sent: u64 = 0;
    let mut chunks: u64 = 0;

    loop {
        let len = fill_chunk(source, &mut payload)?;
        if len == 0 {
            break;
        }
        let prefix = u32::try_from(len).map_err(|_| ClamdError::InvalidBufferSize(buffer_size))?;
        frame.clear();
        frame.put_u32(prefix);
        frame.put_slice(&payload[..len]);
        sink.write_all(&frame).map_err(|e| upload_error(e, sent))?;
        sent += len as u64;
        chunks += 1;
    }

    frame.clear();
    frame.put_u32(0);
    sink.write_all(&frame).map_err(|e| upload_error(e, sent))?;
    trace!(bytes = sent, chunks, "INSTREAM upload complete");
    Ok(sent)
}

/// Read from `source` until `chunk` is full or the source is exhausted.
fn fill_chunk<R: Read + ?Sized>(source: &mut R, chunk: &mut [u8]) -> Result<usize, ClamdError> {
    let mut filled = 0;
    while filled < chunk.len() {
        match source.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClamdError::SourceRead(e)),
        }
    }
    Ok(filled)
}

fn upload_error(err: io::Error, sent: u64) -> ClamdError {
    if is_peer_closed(&err) {
        ClamdError::UploadRejected {
            sent,
            daemon_reply: None,
            source: err,
        }
    } else {
        ClamdError::Io(err)
    }
}
