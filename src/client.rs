//! One-shot request/response exchange with a connection server.
//!
//! Used by the caching proxy to forward misses and by the `request` CLI
//! command. Every exchange opens a fresh connection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::error::{Result, WireError};
use crate::protocol::FrameCodec;

/// Send `request` to `addr` and return the first response frame.
///
/// Connect, write and read together are bounded by `timeout`. Any failure,
/// including a connection that closes before answering, is reported as
/// [`WireError::Upstream`].
pub async fn exchange(
    addr: &str,
    request: &Value,
    timeout: Duration,
    max_frame_bytes: usize,
) -> Result<Value> {
    match tokio::time::timeout(timeout, exchange_inner(addr, request, max_frame_bytes)).await {
        Ok(result) => result,
        Err(_) => Err(WireError::Upstream(format!(
            "no response from {addr} within {}ms",
            timeout.as_millis()
        ))),
    }
}

async fn exchange_inner(addr: &str, request: &Value, max_frame_bytes: usize) -> Result<Value> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| WireError::Upstream(format!("connect to {addr} failed: {e}")))?;
    let (read_half, write_half) = stream.into_split();

    let mut sink = FramedWrite::new(write_half, FrameCodec::with_max_frame_bytes(max_frame_bytes));
    sink.send(request)
        .await
        .map_err(|e| WireError::Upstream(format!("send to {addr} failed: {e}")))?;
    debug!(addr, "Request forwarded");

    let mut frames = FramedRead::new(read_half, FrameCodec::with_max_frame_bytes(max_frame_bytes));
    match frames.next().await {
        Some(Ok(frame)) => serde_json::from_slice(&frame)
            .map_err(|e| WireError::Upstream(format!("invalid response from {addr}: {e}"))),
        Some(Err(e)) => Err(WireError::Upstream(format!("read from {addr} failed: {e}"))),
        None => Err(WireError::Upstream(format!(
            "{addr} closed the connection without responding"
        ))),
    }
}
