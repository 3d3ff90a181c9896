//! `calcwire serve`: run the connection server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use calcwire::config::Config;
use calcwire::providers;
use calcwire::server::CalcServer;

pub(crate) async fn cmd_serve(config: Config) -> Result<()> {
    let generator: Arc<dyn providers::Generator> = Arc::from(providers::from_config(&config.generation));
    info!(backend = generator.name(), "Generation backend selected");

    let server = CalcServer::from_config(&config.server, generator)
        .await
        .with_context(|| format!("Failed to start server on {}", config.server.listen_addr()))?;
    let dispatcher = server.dispatcher();

    let shutdown = CancellationToken::new();
    super::cancel_on_ctrl_c(shutdown.clone());
    server.run(shutdown).await;

    let stats = dispatcher.cache().stats();
    info!(
        entries = stats.entries,
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        "Server stopped"
    );
    Ok(())
}
