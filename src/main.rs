//! chat-relay entry point.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use chat_relay::config::{Cli, Config};
use chat_relay::server::api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    let filter = if cli.verbose {
        "chat_relay=debug,tower_http=debug"
    } else {
        "chat_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("chat-relay v{}", env!("CARGO_PKG_VERSION"));

    // Missing credentials are fatal: refuse to start.
    let mut config = Config::from_env()?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        upstream = %config.upstream.api_url,
        model = %config.upstream.model,
        history_window = config.relay.history_window,
        content_cap = config.relay.content_cap,
        timeout_secs = config.relay.timeout_secs,
        max_retries = config.relay.max_retries,
        stream = config.relay.stream,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(config.clone())?);
    let app = build_router(state);

    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
