//! Caching proxy in front of a connection server.
//!
//! The proxy speaks the same framing and envelopes as the server. It keeps
//! its own LRU of complete successful response envelopes keyed by the
//! canonical request. A hit is answered locally with `meta.proxy_cache`
//! set; a miss is forwarded upstream over a fresh connection and the reply
//! relayed unchanged.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, ResponseCache};
use crate::client;
use crate::config::ProxyConfig;
use crate::error::{Result, WireError};
use crate::protocol::Response;
use crate::session::{FrameHandler, FrameListener};

/// Request handling half of the proxy.
pub struct CachingProxy {
    cache: ResponseCache<Value>,
    upstream_addr: String,
    upstream_timeout: Duration,
    max_frame_bytes: usize,
    forwarded: AtomicU64,
}

impl CachingProxy {
    pub fn new(
        upstream_addr: impl Into<String>,
        cache_size: usize,
        upstream_timeout: Duration,
        max_frame_bytes: usize,
    ) -> Result<Self> {
        Ok(Self {
            cache: ResponseCache::with_capacity(cache_size)?,
            upstream_addr: upstream_addr.into(),
            upstream_timeout,
            max_frame_bytes,
            forwarded: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Self::new(
            config.upstream_addr(),
            config.cache_size,
            config.upstream_timeout(),
            config.max_frame_bytes,
        )
    }

    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.cache
    }

    /// Number of requests sent upstream so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Answer one inbound frame.
    pub async fn handle_bytes(&self, frame: &[u8]) -> Value {
        let request: Value = match serde_json::from_slice(frame) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                return failure(WireError::Protocol(
                    "request must be a JSON object".to_string(),
                ))
            }
            Err(e) => return failure(WireError::Protocol(e.to_string())),
        };

        let use_cache = request
            .pointer("/options/cache")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let key = use_cache.then(|| cache_key(&request));

        if let Some(key) = &key {
            if let Some(mut envelope) = self.cache.get(key) {
                debug!("Proxy cache hit");
                mark_proxy_hit(&mut envelope);
                return envelope;
            }
        }

        self.forwarded.fetch_add(1, Ordering::Relaxed);
        match client::exchange(
            &self.upstream_addr,
            &request,
            self.upstream_timeout,
            self.max_frame_bytes,
        )
        .await
        {
            Ok(envelope) => {
                let succeeded = envelope.get("ok").and_then(Value::as_bool) == Some(true);
                if let (Some(key), true) = (key, succeeded) {
                    self.cache.put(key, envelope.clone());
                }
                envelope
            }
            Err(e) => {
                warn!(upstream = %self.upstream_addr, error = %e, "Upstream exchange failed");
                failure(e)
            }
        }
    }
}

#[async_trait]
impl FrameHandler for CachingProxy {
    type Reply = Value;

    async fn handle_frame(&self, frame: &[u8]) -> Value {
        self.handle_bytes(frame).await
    }
}

fn failure(err: WireError) -> Value {
    Response::from_error(&err).to_value()
}

/// Set `meta.proxy_cache = true`, creating `meta` if the envelope lacks one.
fn mark_proxy_hit(envelope: &mut Value) {
    let Some(fields) = envelope.as_object_mut() else {
        return;
    };
    let meta = fields
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("proxy_cache".to_string(), Value::Bool(true));
    }
}

/// A bound proxy listener. Call [`ProxyServer::run`] to start serving.
pub struct ProxyServer {
    listener: FrameListener,
    proxy: Arc<CachingProxy>,
}

impl ProxyServer {
    pub async fn bind(addr: &str, proxy: CachingProxy) -> Result<Self> {
        let listener = FrameListener::bind(addr, proxy.max_frame_bytes).await?;
        Ok(Self {
            listener,
            proxy: Arc::new(proxy),
        })
    }

    pub async fn from_config(config: &ProxyConfig) -> Result<Self> {
        Self::bind(&config.listen_addr(), CachingProxy::from_config(config)?).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn proxy(&self) -> Arc<CachingProxy> {
        Arc::clone(&self.proxy)
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            addr = %self.local_addr(),
            upstream = %self.proxy.upstream_addr,
            cache_capacity = self.proxy.cache.capacity(),
            "Caching proxy starting"
        );
        self.listener.serve(self.proxy, shutdown).await;
    }
}
