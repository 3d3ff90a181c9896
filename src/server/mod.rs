//! The calc/generate connection server.

pub mod dispatcher;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::providers::Generator;
use crate::session::FrameListener;

pub use dispatcher::Dispatcher;

/// A bound connection server. Call [`CalcServer::run`] to start serving.
pub struct CalcServer {
    listener: FrameListener,
    dispatcher: Arc<Dispatcher>,
}

impl CalcServer {
    /// Bind `addr` and prepare to serve with `dispatcher`.
    pub async fn bind(addr: &str, dispatcher: Dispatcher, max_frame_bytes: usize) -> Result<Self> {
        let listener = FrameListener::bind(addr, max_frame_bytes).await?;
        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Build the cache and dispatcher from `config` and bind its address.
    pub async fn from_config(config: &ServerConfig, generator: Arc<dyn Generator>) -> Result<Self> {
        let cache = Arc::new(crate::cache::ResponseCache::with_capacity(config.cache_size)?);
        let dispatcher = Dispatcher::new(cache, generator);
        Self::bind(&config.listen_addr(), dispatcher, config.max_frame_bytes).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            addr = %self.local_addr(),
            cache_capacity = self.dispatcher.cache().capacity(),
            "Calc server starting"
        );
        self.listener.serve(self.dispatcher, shutdown).await;
    }
}
