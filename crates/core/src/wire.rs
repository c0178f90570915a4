//! Line-delimited request/response framing over TCP (§4.1).
//!
//! Every sub-request in this system — coordinator to worker, coordinator to
//! peer replica — is one UTF-8 line terminated by `\n`, sent over a socket
//! with a caller-supplied deadline. There is no multiplexing: callers open a
//! fresh connection per sub-request (workers) or hold one persistent
//! connection per peer (replication), but never send two requests in flight
//! on the same socket without reading the reply first.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// The four transport outcomes from §4.1. All surface to an engine as "no
/// valid vote from this worker" / "no decision from this peer" — callers
/// should not need to match on the variant to decide what to do, only to log
/// it.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("connect or read timed out")]
    Timeout,

    #[error("connection refused or reset before a byte arrived")]
    Unreachable(#[source] io::Error),

    #[error("socket closed after the request was sent, before any reply byte")]
    Dropped,

    #[error("malformed line: {0}")]
    Protocol(String),
}

/// Maximum line length accepted from a peer. Lines are short, fixed-shape
/// protocol messages; an unbounded read would let a misbehaving peer exhaust
/// memory.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Connect to `addr`, bounded by `timeout`. Maps connect-time failures per
/// §4.1: anything that fails before a connection is established is
/// [`WireError::Unreachable`], exhausting the deadline is [`WireError::Timeout`].
pub async fn connect_with_timeout(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, WireError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(WireError::Unreachable(err)),
        Err(_elapsed) => Err(WireError::Timeout),
    }
}

/// Write `line` followed by `\n` and flush. `line` must not contain an
/// embedded newline (the data model's requirement on requests/responses);
/// callers that build lines from untrusted content should reject embedded
/// newlines before calling this.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    debug_assert!(!line.contains('\n'), "wire lines must not embed a newline");
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Read one line, bounded by `timeout`, distinguishing the three failure
/// shapes from §4.1 that can happen mid-read:
///
/// - the deadline elapses → [`WireError::Timeout`]
/// - the peer closes before any byte arrives → [`WireError::Dropped`]
/// - the peer closes after some bytes but no trailing `\n` → [`WireError::Protocol`]
pub async fn read_line_with_timeout<R>(
    reader: &mut BufReader<R>,
    timeout: Duration,
) -> Result<String, WireError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = String::new();
    let read = tokio::time::timeout(timeout, reader.take(MAX_LINE_BYTES as u64).read_line(&mut buf));
    match read.await {
        Ok(Ok(0)) => Err(WireError::Dropped),
        Ok(Ok(_)) => {
            if !buf.ends_with('\n') {
                return Err(WireError::Protocol(format!(
                    "stream closed mid-line or line exceeded {MAX_LINE_BYTES} bytes"
                )));
            }
            let line = buf.trim_end_matches(['\n', '\r']).to_string();
            if line.contains('\0') {
                return Err(WireError::Protocol("line contains a NUL byte".to_string()));
            }
            Ok(line)
        }
        Ok(Err(err)) => Err(WireError::Protocol(err.to_string())),
        Err(_elapsed) => Err(WireError::Timeout),
    }
}

/// Open a fresh connection, write `request`, and read one reply line, all
/// bounded by `timeout`. This is the shape every quorum sub-request and
/// replication phase call uses (§4.1, §4.5, §4.6): one connection, one
/// request, one reply.
pub async fn call_once(addr: SocketAddr, request: &str, timeout: Duration) -> Result<String, WireError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut stream = connect_with_timeout(addr, timeout).await?;

    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    tokio::time::timeout(remaining, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| WireError::Timeout)?
        .map_err(WireError::Unreachable)?;
    tokio::time::timeout(remaining, stream.write_all(b"\n"))
        .await
        .map_err(|_| WireError::Timeout)?
        .map_err(WireError::Unreachable)?;

    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    let mut reader = BufReader::new(stream);
    read_line_with_timeout(&mut reader, remaining).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn read_line_returns_dropped_on_immediate_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut reader = BufReader::new(stream);
        let err = read_line_with_timeout(&mut reader, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Dropped));
    }

    #[tokio::test]
    async fn read_line_returns_timeout_when_nothing_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Hold the connection open without writing anything.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut reader = BufReader::new(stream);
        let err = read_line_with_timeout(&mut reader, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Timeout));
    }

    #[tokio::test]
    async fn read_line_returns_protocol_error_on_malformed_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"no newline here").await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut reader = BufReader::new(stream);
        let err = read_line_with_timeout(&mut reader, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
    }

    #[tokio::test]
    async fn call_once_round_trips_a_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), "REQ_1");
            let mut stream = reader.into_inner();
            write_line(&mut stream, "ACK_W1_REQ_1").await.unwrap();
        });

        let reply = call_once(addr, "REQ_1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, "ACK_W1_REQ_1");
    }
}
