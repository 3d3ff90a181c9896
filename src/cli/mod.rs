//! Command-line interface.

mod proxy;
mod request;
mod serve;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use calcwire::config::Config;

#[derive(Parser, Debug)]
#[command(name = "calcwire", version, about = "Line-delimited JSON calc/generate service")]
struct Cli {
    /// Config file (default: ~/.calcwire/config.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the calc/generate connection server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Response cache capacity in entries
        #[arg(long)]
        cache_size: Option<usize>,
    },
    /// Run the caching proxy in front of a connection server
    Proxy {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        upstream_host: Option<String>,
        #[arg(long)]
        upstream_port: Option<u16>,
        #[arg(long)]
        cache_size: Option<usize>,
        /// Upstream exchange timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Send a single request and print the response
    Request {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5555)]
        port: u16,
        #[arg(long, value_enum, default_value_t = request::RequestMode::Calc)]
        mode: request::RequestMode,
        /// Expression for calc mode
        #[arg(long, required_if_eq("mode", "calc"))]
        expr: Option<String>,
        /// Prompt for generate mode
        #[arg(long, required_if_eq("mode", "generate"))]
        prompt: Option<String>,
        /// Ask the server to bypass its cache
        #[arg(long)]
        no_cache: bool,
    },
}

/// Parse arguments, set up logging and configuration, and run the command.
pub(crate) async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            cache_size,
        } => {
            override_opt(&mut config.server.host, host);
            override_opt(&mut config.server.port, port);
            override_opt(&mut config.server.cache_size, cache_size);
            config.validate()?;
            serve::cmd_serve(config).await
        }
        Commands::Proxy {
            host,
            port,
            upstream_host,
            upstream_port,
            cache_size,
            timeout_secs,
        } => {
            override_opt(&mut config.proxy.host, host);
            override_opt(&mut config.proxy.port, port);
            override_opt(&mut config.proxy.upstream_host, upstream_host);
            override_opt(&mut config.proxy.upstream_port, upstream_port);
            override_opt(&mut config.proxy.cache_size, cache_size);
            override_opt(&mut config.proxy.upstream_timeout_secs, timeout_secs);
            config.validate()?;
            proxy::cmd_proxy(config).await
        }
        Commands::Request {
            host,
            port,
            mode,
            expr,
            prompt,
            no_cache,
        } => {
            let input = match mode {
                request::RequestMode::Calc => expr,
                request::RequestMode::Generate => prompt,
            }
            .unwrap_or_default();
            request::cmd_request(&config, &format!("{host}:{port}"), mode, &input, !no_cache).await
        }
    }
}

fn override_opt<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` level.
fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

/// Cancel `token` on Ctrl-C.
pub(crate) fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        token.cancel();
    });
}
