use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod app;
mod error;
mod http;

/// Loom conversational agent gateway.
#[derive(Parser, Debug)]
#[command(name = "loom-gateway")]
struct Cli {
    /// Path to a TOML config file (overrides LOOM_CONFIG and ./loom.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the bind address (host:port split across gateway.bind/gateway.port).
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loom_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = loom_core::config::ServerConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        loom_core::config::ServerConfig::default()
    });

    if let Some(bind) = cli.bind {
        if let Some((host, port)) = bind.rsplit_once(':') {
            config.gateway.bind = host.to_string();
            if let Ok(port) = port.parse() {
                config.gateway.port = port;
            }
        }
    }

    if std::env::var("OPENAI_API_KEY").is_err() {
        warn!("OPENAI_API_KEY is not set — chats will fail once a message is sent");
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config)?);
    let router = app::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("loom gateway listening on {}", addr);

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_termination().await;
            info!("shutdown signal received, draining in-flight turns");
            shutdown_signal.cancel();
            // Give in-flight turns a grace window to finish and flush the store
            // before the process exits.
            tokio::time::sleep(Duration::from_secs(2)).await;
        })
        .await?;

    Ok(())
}

async fn wait_for_termination() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
