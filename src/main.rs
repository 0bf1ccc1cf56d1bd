use anyhow::Context;
use chrono_mcp::client::ClientProvider;
use chrono_mcp::common::logging;
use chrono_mcp::config::{Config, TransportKind, API_TOKEN_ENV};
use chrono_mcp::mcp::{self, Options, Server};
use ringlog::*;
use std::net::SocketAddr;
use std::sync::Arc;

/// Link base used in loopback mode when no api_url is configured.
const LOOPBACK_LINK_BASE: &str = "https://loopback.invalid";

fn main() -> anyhow::Result<()> {
    let options = Options::try_from(mcp::command().get_matches()).map_err(anyhow::Error::msg)?;

    let mut config = match &options.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if options.loopback {
        config.upstream.loopback = true;
    }
    if let Some(transport) = options.transport {
        config.server.transport = transport;
    }
    let config = config.finish(std::env::var(API_TOKEN_ENV).ok())?;

    let level = logging::effective_level(logging::parse_level(&config.log.level), options.verbose);
    logging::configure(level).map_err(anyhow::Error::msg)?;

    if let Some(path) = config.font_path() {
        if let Err(e) = chrono_mcp::chart::register_font(path) {
            warn!("chart font {:?} not loaded: {e}", path);
        }
    }

    let clients = if config.upstream.loopback {
        let base = if config.upstream.api_url.is_empty() {
            LOOPBACK_LINK_BASE
        } else {
            config.upstream.api_url.as_str()
        };
        ClientProvider::loopback(base)?
    } else {
        ClientProvider::live(config.upstream())?
    };
    let registry = mcp::build_registry(Arc::new(clients), config.chart())?;
    info!("{} {} serving {} tools", chrono_mcp::common::COMPONENT, chrono_mcp::common::VERSION, registry.len());
    let server = Arc::new(Server::new(registry));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chrono-mcp")
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        match config.server.transport {
            TransportKind::Stdio => server.run_stdio().await,
            TransportKind::Http => {
                let listen: SocketAddr = config
                    .server
                    .listen
                    .parse()
                    .with_context(|| format!("invalid listen address {:?}", config.server.listen))?;
                server.run_http(listen).await
            }
        }
        .context("server exited with an error")
    })
}
