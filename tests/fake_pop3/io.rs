//! Shared I/O helpers for the fake POP3 server.
//!
//! These are thin wrappers around `AsyncWriteExt` that flush after
//! every write, which keeps the test server simple and deterministic.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Write a string to the stream and flush.
pub async fn write_line<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    line: &str,
) -> std::io::Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await
}

/// Write a positive status line followed by a dot-terminated body.
///
/// Body lines starting with `.` get an extra `.` prepended
/// (dot-stuffing, RFC 1939 Section 3) so the client can tell them apart
/// from the terminating `.` line.
pub async fn write_multiline<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    status: &str,
    lines: &[Vec<u8>],
) -> std::io::Result<()> {
    let mut out = Vec::new();
    out.extend_from_slice(status.as_bytes());
    out.extend_from_slice(b"\r\n");
    for line in lines {
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    stream.get_mut().write_all(&out).await?;
    stream.get_mut().flush().await
}
