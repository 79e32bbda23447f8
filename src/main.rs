// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

use chatrelay::config;
use chatrelay::engine;
use chatrelay::proxy;

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chatrelay", about = "Streaming chat relay for Azure OpenAI")]
struct Cli {
    /// Path to the chatrelay.yaml config file
    #[arg(long, default_value = "chatrelay.yaml", env = "CHATRELAY_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = 5000, env = "CHATRELAY_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "CHATRELAY_HOST")]
    host: IpAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::new(cli.host, cli.port);
    tracing::info!(%addr, "chatrelay starting");

    let source = config::FileSource::new(&cli.config);
    let config = match config::load_config(&source) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        stream = config.stream,
        deployment = %config.upstream.deployment,
        retrieval = config.search.is_some(),
        config_hash = %config.config_hash,
        "config loaded"
    );

    let relay = match engine::build_engine(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("failed to build upstream client: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(mode = relay.mode().as_str(), "relay ready");

    let upstream: Arc<dyn proxy::UpstreamClient> = Arc::new(relay);
    let app = proxy::build_router(upstream);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "chatrelay listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
