use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sql_gateway::api::routes::create_router_with_state;
use sql_gateway::config::Config;
use sql_gateway::storage::SqliteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let ansi = match config.logging.style.as_str() {
        "never" => false,
        "always" => true,
        _ => std::io::IsTerminal::is_terminal(&std::io::stdout()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .init();

    info!("Starting server on {}", config.server_address());

    let storage = Arc::new(
        SqliteStorage::new(&config.database.url)
            .await
            .with_context(|| format!("Failed to open profile store at {}", config.database.url))?,
    );

    info!(
        "Federated client: {}, descriptors in {}",
        config.federated.client_binary.display(),
        config.federated.descriptor_dir.display()
    );

    let app: Router = create_router_with_state(storage, config.clone());

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server_address()))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
