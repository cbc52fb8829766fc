//! Wire protocol between the pool manager and a worker process.
//!
//! A minimal framed, synchronous, half-duplex protocol over two byte streams
//! (manager→worker requests on the worker's stdin, worker→manager responses
//! on its stdout). Each message starts with a one-byte control tag; `CALL`
//! requests and `READY` responses carry a length-prefixed payload.
//!
//! The protocol is not pipelined: a new request must not be written until the
//! previous response (or a confirmed failure) has been fully consumed. This
//! keeps framing unambiguous without message IDs.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::metadata::ExtractionResult;

/// Worker is idle and able to accept a request; also prefixes a successful
/// `CALL` response.
pub const READY: u8 = 0x01;
/// Liveness probe, echoed back by the worker.
pub const PING: u8 = 0x02;
/// Parse request, followed by a length-prefixed UTF-8 document path.
pub const CALL: u8 = 0x03;
/// Graceful shutdown request.
pub const DONE: u8 = 0x04;
/// Unexpected or fatal condition, followed by raw diagnostic bytes until
/// end-of-stream.
pub const ERROR: u8 = 0x05;

/// Upper bound on a single frame. Lengths beyond this are treated as stream
/// corruption rather than allocated.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Cap on diagnostic text drained from a failed worker's stream.
const MAX_DIAGNOSTIC_LEN: usize = 64 * 1024;

/// Compression level for response payloads (zstd default).
const COMPRESSION_LEVEL: i32 = 0;

/// Write one length-prefixed frame: `u32` big-endian length, then the bytes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", payload.len()),
        ));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Read one length-prefixed frame, rejecting absurd lengths as corruption.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit, stream corrupt"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Serialize a result to its wire form: zstd-compressed JSON.
pub fn encode_result(result: &ExtractionResult) -> io::Result<Vec<u8>> {
    let json = serde_json::to_vec(result)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
}

/// Deserialize a result from its wire form.
pub fn decode_result(payload: &[u8]) -> io::Result<ExtractionResult> {
    let json = zstd::decode_all(payload)?;
    serde_json::from_slice(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Drain a failed worker's response stream to end-of-stream and return it as
/// lossy UTF-8 diagnostic text, capped at [`MAX_DIAGNOSTIC_LEN`] bytes.
pub async fn drain_diagnostics<R>(reader: &mut R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while buf.len() < MAX_DIAGNOSTIC_LEN {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    buf.truncate(MAX_DIAGNOSTIC_LEN);
    String::from_utf8_lossy(&buf).into_owned()
}
