//! `calcwire request`: send one request and print the response envelope.

use anyhow::{Context, Result};
use serde_json::{json, Value};

use calcwire::client;
use calcwire::config::Config;

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum RequestMode {
    Calc,
    Generate,
}

/// Build the request envelope for `mode` with `input` as expression or prompt.
pub(crate) fn build_request(mode: RequestMode, input: &str, cache: bool) -> Value {
    let (mode, field) = match mode {
        RequestMode::Calc => ("calc", "expr"),
        RequestMode::Generate => ("generate", "prompt"),
    };
    json!({
        "mode": mode,
        "data": { field: input },
        "options": { "cache": cache },
    })
}

pub(crate) async fn cmd_request(
    config: &Config,
    addr: &str,
    mode: RequestMode,
    input: &str,
    cache: bool,
) -> Result<()> {
    let request = build_request(mode, input, cache);
    let response = client::exchange(
        addr,
        &request,
        config.proxy.upstream_timeout(),
        config.server.max_frame_bytes,
    )
    .await
    .with_context(|| format!("Request to {addr} failed"))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
