//! Copy Task
//!
//! One-directional byte streaming between two halves of a relay session.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use super::session::{Direction, RelaySession};

/// Result of a single copy pass
#[derive(Debug)]
pub struct CopyOutcome {
    /// Bytes written to the destination, partial when `error` is set
    pub bytes: u64,
    pub error: Option<io::Error>,
}

impl CopyOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Stream everything from `reader` into `writer` until EOF or an I/O error.
///
/// On EOF the destination is flushed and its write side shut down, so the
/// peer observes the end of stream as well. A read or write error shuts the
/// destination down too; the error is kept in the outcome.
pub async fn copy_stream<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> CopyOutcome
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(buffer_size);
    let mut bytes = 0u64;

    loop {
        buf.clear();
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    return abort_copy(writer, bytes, e).await;
                }
                bytes += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return abort_copy(writer, bytes, e).await,
        }
    }

    let error = half_close(writer).await.err();
    CopyOutcome { bytes, error }
}

/// End a failed copy; the destination's write side is still shut down
async fn abort_copy<W>(writer: &mut W, bytes: u64, error: io::Error) -> CopyOutcome
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if let Err(e) = writer.shutdown().await {
        if !is_already_closed(&e) {
            debug!("shutdown after failed copy: {}", e);
        }
    }
    CopyOutcome {
        bytes,
        error: Some(error),
    }
}

async fn half_close<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.flush().await?;
    match writer.shutdown().await {
        Err(e) if is_already_closed(&e) => Ok(()),
        other => other,
    }
}

/// Errors that only mean the peer got there first
pub(crate) fn is_already_closed(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::NotConnected
}

/// Run one direction of `session`, log the outcome and hand the halves back.
pub async fn run_copy_task<R, W>(
    session: Arc<RelaySession>,
    direction: Direction,
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
) -> (R, W, u64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (source, destination) = session.endpoints(direction);
    info!(
        "[{}] starts copying {} => {}",
        session.session_id, source, destination
    );

    let outcome = copy_stream(&mut reader, &mut writer, buffer_size).await;
    session.add_bytes(direction, outcome.bytes);

    match &outcome.error {
        None => info!(
            "[{}] copy data: {} to {} | {}",
            session.session_id,
            source,
            destination,
            format_bytes(outcome.bytes)
        ),
        Some(e) => error!(
            "[{}] copy data from {} to {} failed after {}: {}",
            session.session_id,
            source,
            destination,
            format_bytes(outcome.bytes),
            e
        ),
    }
    debug!("[{}] {} finished", session.session_id, direction);

    (reader, writer, outcome.bytes)
}

/// Format a byte count with SI units (`82 kB`, `1.2 MB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 10 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    let rounded = (value * 10.0 + 0.5).floor() / 10.0;
    if rounded < 10.0 {
        format!("{:.1} {}", rounded, UNITS[unit])
    } else {
        format!("{:.0} {}", rounded, UNITS[unit])
    }
}
