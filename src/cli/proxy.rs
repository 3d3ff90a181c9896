//! `calcwire proxy`: run the caching proxy.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use calcwire::config::Config;
use calcwire::proxy::ProxyServer;

pub(crate) async fn cmd_proxy(config: Config) -> Result<()> {
    let server = ProxyServer::from_config(&config.proxy)
        .await
        .with_context(|| format!("Failed to start proxy on {}", config.proxy.listen_addr()))?;
    let proxy = server.proxy();

    let shutdown = CancellationToken::new();
    super::cancel_on_ctrl_c(shutdown.clone());
    server.run(shutdown).await;

    let stats = proxy.cache().stats();
    info!(
        entries = stats.entries,
        hits = stats.hits,
        misses = stats.misses,
        forwarded = proxy.forwarded(),
        "Proxy stopped"
    );
    Ok(())
}
