use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use devproxy::config::Config;
use devproxy::server::{self, AppState};

/// Development server with prefix-based reverse proxy rules
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML config file (defaults to ./devproxy.yaml when present)
    #[arg(short, long, env = "DEVPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Interface address to bind, overrides server.host
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overrides server.port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let mut cfg = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        cfg.server.host = host;
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }

    let app = AppState::from_config(&cfg).context("Invalid proxy configuration")?;
    for rule in app.engine.rules() {
        tracing::info!(
            prefix = %rule.prefix,
            upstream = %rule.target,
            change_origin = rule.change_origin,
            "Proxy rule registered"
        );
    }
    tracing::info!(root = %app.static_files.root().display(), "Serving static files");

    let listen_addr = cfg.server.listen_addr();
    let app = Arc::new(app);

    tokio::select! {
        res = server::listener::run(&listen_addr, app) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
