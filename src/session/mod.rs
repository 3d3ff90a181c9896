//! Connection sessions shared by the calc server and the caching proxy.
//!
//! A [`FrameListener`] accepts TCP connections and spawns one task per
//! connection. Each task runs a session: read a frame, hand it to the
//! [`FrameHandler`], write the reply, repeat. Requests on one connection are
//! answered strictly in order; different connections proceed independently.
//!
//! A frame that exceeds the size limit or a stream that ends mid-frame gets a
//! best-effort `Malformed request` reply before the connection is closed.
//! Every other failure inside a handler is already an envelope by the time it
//! reaches this layer, so only socket errors end a session.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::{Result, WireError};
use crate::protocol::{FrameCodec, FrameError, Response};

/// Turns one inbound frame into one reply.
///
/// Implementations never fail: every error is rendered into the reply.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    type Reply: Serialize + Send;

    async fn handle_frame(&self, frame: &[u8]) -> Self::Reply;
}

/// A bound TCP listener that serves newline-delimited JSON sessions.
pub struct FrameListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_frame_bytes: usize,
}

impl FrameListener {
    /// Bind `addr` (`host:port`). Port `0` picks an ephemeral port.
    pub async fn bind(addr: &str, max_frame_bytes: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| WireError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            max_frame_bytes,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Cancellation stops the accept loop immediately; open sessions finish
    /// their in-flight request and then close.
    pub async fn serve<H: FrameHandler>(self, handler: Arc<H>, shutdown: CancellationToken) {
        info!(addr = %self.local_addr, "Listening for connections");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let handler = Arc::clone(&handler);
                    let token = shutdown.child_token();
                    let max_frame_bytes = self.max_frame_bytes;
                    tokio::spawn(
                        async move {
                            debug!("Connection opened");
                            match run_session(stream, handler.as_ref(), max_frame_bytes, &token)
                                .await
                            {
                                Ok(served) => debug!(served, "Connection closed"),
                                Err(e) => warn!(error = %e, "Connection closed with error"),
                            }
                        }
                        .instrument(info_span!("conn", %peer)),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Accept error");
                }
            }
        }

        info!(addr = %self.local_addr, "Listener stopped");
    }
}

/// Serve one connection until EOF, a socket error or cancellation.
///
/// Returns the number of requests answered.
pub async fn run_session<H: FrameHandler>(
    stream: TcpStream,
    handler: &H,
    max_frame_bytes: usize,
    shutdown: &CancellationToken,
) -> Result<u64> {
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, FrameCodec::with_max_frame_bytes(max_frame_bytes));
    let mut replies = FramedWrite::new(write_half, FrameCodec::with_max_frame_bytes(max_frame_bytes));
    let mut served = 0u64;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return Ok(served),
            next = frames.next() => next,
        };

        match next {
            None => return Ok(served),
            Some(Ok(frame)) => {
                let reply = handler.handle_frame(&frame).await;
                replies.send(reply).await?;
                served += 1;
            }
            Some(Err(FrameError::Io(e))) => return Err(WireError::Io(e)),
            Some(Err(e)) => {
                let reply = Response::from_error(&WireError::Protocol(e.to_string()));
                // The peer may already be gone; the framing error is what matters.
                let _ = replies.send(reply).await;
                return Err(WireError::Frame(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Echoes the frame length back, so ordering is observable.
    struct LengthHandler;

    #[async_trait]
    impl FrameHandler for LengthHandler {
        type Reply = Value;

        async fn handle_frame(&self, frame: &[u8]) -> Value {
            json!({ "len": frame.len() })
        }
    }

    async fn start(max_frame_bytes: usize) -> (SocketAddr, CancellationToken) {
        let listener = FrameListener::bind("127.0.0.1:0", max_frame_bytes)
            .await
            .unwrap();
        let addr = listener.local_addr();
        let token = CancellationToken::new();
        tokio::spawn(listener.serve(Arc::new(LengthHandler), token.clone()));
        (addr, token)
    }

    async fn read_reply(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let listener = FrameListener::bind("127.0.0.1:0", 1024).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = FrameListener::bind("127.0.0.1:0", 1024).await.unwrap();
        let addr = first.local_addr().to_string();
        let err = FrameListener::bind(&addr, 1024).await.err().unwrap();
        assert!(matches!(err, WireError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_pipelined_frames_answered_in_order() {
        let (addr, token) = start(1024).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"a\nbbb\n\ncc\r\n").await.unwrap();
        assert_eq!(read_reply(&mut reader).await["len"], 1);
        assert_eq!(read_reply(&mut reader).await["len"], 3);
        assert_eq!(read_reply(&mut reader).await["len"], 2);
        token.cancel();
    }

    #[tokio::test]
    async fn test_split_frame_is_reassembled() {
        let (addr, token) = start(1024).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"abc").await.unwrap();
        write_half.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        write_half.write_all(b"de\n").await.unwrap();
        assert_eq!(read_reply(&mut reader).await["len"], 5);
        token.cancel();
    }

    #[tokio::test]
    async fn test_oversized_frame_gets_error_then_close() {
        let (addr, token) = start(16).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(&[b'x'; 64]).await.unwrap();
        let reply = read_reply(&mut reader).await;
        assert_eq!(reply["ok"], false);
        assert!(reply["error"]
            .as_str()
            .unwrap()
            .starts_with("Malformed request:"));

        let mut rest = String::new();
        assert_eq!(reader.read_line(&mut rest).await.unwrap(), 0);
        token.cancel();
    }

    #[tokio::test]
    async fn test_connections_are_independent() {
        let (addr, token) = start(1024).await;
        let idle = TcpStream::connect(addr).await.unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        write_half.write_all(b"xy\n").await.unwrap();
        assert_eq!(read_reply(&mut reader).await["len"], 2);

        drop(idle);
        token.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_accepting() {
        let listener = FrameListener::bind("127.0.0.1:0", 1024).await.unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(listener.serve(Arc::new(LengthHandler), token.clone()));
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
