//! Just enough HTTP to share one listener between the liveness page and
//! the WebSocket upgrade.
//!
//! The acceptor reads the request head itself to route on the path, then
//! hands the handshake to tungstenite through [`Rewind`], which replays
//! the consumed bytes ahead of the live stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Upper bound on a request head; anything larger is rejected.
const MAX_HEAD_BYTES: usize = 8 * 1024;

const HELLO_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Length: 13\r\n\
Connection: close\r\n\
\r\n\
Hello, there\n";

const NOT_FOUND_RESPONSE: &[u8] = b"HTTP/1.1 404 Not Found\r\n\
Content-Length: 0\r\n\
Connection: close\r\n\
\r\n";

/// The request line, split for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

/// Read up to and including the blank line ending the request head.
/// Returns the parsed request line and every byte consumed, so the
/// stream can be rewound for the WebSocket handshake.
pub async fn read_head<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> io::Result<(RequestHead, Vec<u8>)> {
    let mut consumed = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];

    while !contains_head_end(&consumed) {
        if consumed.len() > MAX_HEAD_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        consumed.extend_from_slice(&chunk[..n]);
    }

    let head = parse_request_line(&consumed)?;
    Ok((head, consumed))
}

fn contains_head_end(bytes: &[u8]) -> bool {
    bytes.windows(4).any(|w| w == b"\r\n\r\n")
}

fn parse_request_line(bytes: &[u8]) -> io::Result<RequestHead> {
    let line_end = bytes
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing request line"))?;
    let line = std::str::from_utf8(&bytes[..line_end])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request line not utf-8"))?;

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "malformed request line",
        ));
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    Ok(RequestHead {
        method: method.to_string(),
        path,
        query,
    })
}

/// Serve the non-WebSocket paths: `/` is the liveness page, everything
/// else is a 404.
pub async fn respond_plain<S: AsyncWrite + Unpin>(
    mut stream: S,
    head: &RequestHead,
) -> io::Result<()> {
    let response = if head.path == "/" {
        HELLO_RESPONSE
    } else {
        NOT_FOUND_RESPONSE
    };
    stream.write_all(response).await?;
    stream.shutdown().await
}

/// A stream that serves `prefix` before delegating to the inner stream.
/// Writes and shutdown pass straight through.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.offset < this.prefix.len() {
            let remaining = &this.prefix[this.offset..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.offset += n;
            if this.offset == this.prefix.len() {
                this.prefix = Vec::new();
                this.offset = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
