// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Binary entry point: loads configuration, dials every configured
//! upstream, and keeps the head-tracking core running until asked to stop.
//! The JSON-RPC server transport that would expose [`Proxy`]/[`UnSupport`]
//! to downstream clients is outside this core's scope (spec §1) and is not
//! implemented here.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use multiaddr::{Multiaddr, Protocol};
use tracing_subscriber::EnvFilter;

use filecoin_chain_proxy::config::ProxyConfig;
use filecoin_chain_proxy::context::Context;
use filecoin_chain_proxy::types::NodeInfo;
use filecoin_chain_proxy::upstream::{JsonRpcUpstream, UpstreamClient};

#[derive(Debug, Parser)]
#[command(name = "chain-proxy", about = "Chain-aware Filecoin RPC aggregating proxy")]
struct Args {
    /// Path to a TOML configuration file (spec §6).
    #[arg(long, default_value = "chain-proxy.toml")]
    config: PathBuf,

    /// Extra `<token>:<multiaddr>` upstream connections, in addition to any
    /// listed in the config file. Repeatable.
    #[arg(long = "upstream")]
    upstreams: Vec<String>,
}

/// Resolves a dial `Multiaddr` to the `ws://` and `http://` URLs the real
/// `jsonrpsee` clients need, following the same host/port extraction as the
/// original `apiinfo.DialArgs` helper (`original_source/co/node.go`).
fn dial_urls(addr: &Multiaddr) -> anyhow::Result<(String, String)> {
    let mut host = None;
    let mut port = None;
    for proto in addr.iter() {
        match proto {
            Protocol::Ip4(ip) => host = Some(ip.to_string()),
            Protocol::Ip6(ip) => host = Some(ip.to_string()),
            Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => {
                host = Some(name.to_string())
            }
            Protocol::Tcp(p) => port = Some(p),
            _ => {}
        }
    }
    let host = host.ok_or_else(|| anyhow::anyhow!("multiaddr {addr} has no host component"))?;
    let port = port.ok_or_else(|| anyhow::anyhow!("multiaddr {addr} has no /tcp component"))?;
    Ok((
        format!("ws://{host}:{port}/rpc/v1"),
        format!("http://{host}:{port}/rpc/v0"),
    ))
}

async fn connect(info: &NodeInfo) -> anyhow::Result<Arc<dyn UpstreamClient>> {
    let (ws_url, http_url) = dial_urls(&info.addr)?;
    let upstream = JsonRpcUpstream::connect(&ws_url, &http_url, &info.auth_token).await?;
    Ok(Arc::new(upstream))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = if args.config.exists() {
        ProxyConfig::load(&args.config)?
    } else {
        tracing::warn!(path = %args.config.display(), "config file not found, using defaults");
        ProxyConfig::default()
    };
    for upstream in &args.upstreams {
        config.add_upstream(upstream)?;
    }

    let upstreams = config.upstreams.clone();
    let ctx = Context::new(config.node_option());

    // Connect sequentially: a single upstream failing to dial at startup
    // must not prevent the others from coming up, so each failure is
    // logged and skipped rather than aborting the loop.
    let mut connected = Vec::with_capacity(upstreams.len());
    for info in upstreams {
        match connect(&info).await {
            Ok(upstream) => {
                let upstream: Arc<dyn UpstreamClient> = upstream;
                connected.push((info, upstream));
            }
            Err(e) => tracing::error!(address = %info.key(), error = %e, "failed to connect upstream"),
        }
    }

    let by_address: std::collections::HashMap<String, Arc<dyn UpstreamClient>> =
        connected.iter().map(|(info, up)| (info.key(), Arc::clone(up))).collect();
    ctx.connect_all(
        connected.iter().map(|(info, _)| info.clone()).collect(),
        move |info| Arc::clone(&by_address[&info.key()]),
    )
    .await;

    tracing::info!(upstreams = ctx.node_store.len(), "chain-proxy running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    ctx.shutdown();

    Ok(())
}
