//! # gqlws-gateway
//!
//! Gateway binary: loads settings, wires the demo greeting engine into the
//! server and serves `graphql-transport-ws` until Ctrl-C.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gqlws_core::{InitPayloadAttributes, InterceptorChain, StaticAttributes};
use gqlws_server::{GatewayServer, ServerConfig};
use serde_json::json;

use crate::demo::GreetingEngine;

/// GraphQL over WebSocket gateway.
#[derive(Parser, Debug)]
#[command(name = "gqlws-gateway", about = "graphql-transport-ws gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.gqlws/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds a client has to send `connection_init` (overrides settings).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    init_timeout_ms: Option<u64>,

    /// Log level (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of the settings-derived config.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ms) = self.init_timeout_ms {
            config.connection.init_timeout = Duration::from_millis(ms);
        }
    }
}

/// Context decoration: a default `name`, replaced by the init payload's.
fn interceptors() -> InterceptorChain {
    InterceptorChain::new()
        .with(StaticAttributes::new().with("name", json!("James")))
        .with(InitPayloadAttributes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(gqlws_settings::settings_path);
    let settings = gqlws_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    gqlws_core::logging::init_subscriber(level, settings.logging.json);

    let metrics = gqlws_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let mut config = ServerConfig::from_settings(&settings);
    args.apply(&mut config);

    let server = GatewayServer::new(config, Arc::new(GreetingEngine::new()))
        .with_interceptors(interceptors())
        .with_metrics(metrics);
    let handle = server.listen().await.context("Failed to start server")?;
    tracing::info!(addr = %handle.local_addr(), "gqlws gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");

    let report = server.stop(handle).await;
    if !report.is_clean() {
        tracing::warn!(
            connections = report.lingering_connections,
            operations = report.lingering_operations,
            "connections still open at shutdown timeout"
        );
    }
    Ok(())
}
