use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bloomcache::cli;
use bloomcache::transport::{CommandServer, TcpExchange};
use bloomcache::Cache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bloomcache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings();
    let listen_socket = settings.listen_socket();

    let exchange = Arc::new(TcpExchange::new(
        settings.request_timeout(),
        settings.request_timeout(),
    ));
    let cache = Arc::new(Cache::new(settings, exchange)?);
    let cancel = cache.cancellation_token();

    // Bind before dialing out so peers that gossip us back can reach us
    let server = CommandServer::bind(&listen_socket, Arc::clone(&cache)).await?;
    let server_task = tokio::spawn(server.run(cancel.clone()));

    let sweeper = Arc::clone(&cache);
    let eviction_task = tokio::spawn(async move { sweeper.run_eviction().await });

    let refresher = Arc::clone(&cache);
    let refresh_task = tokio::spawn(async move { refresher.run_filter_refresh().await });

    if let Err(e) = cache.start().await {
        error!("Peer startup failed, serving local keys only: {}", e);
    }

    info!("bloomcache running on {}", listen_socket);
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    cache.shutdown().await;
    let (server, eviction, refresh) = tokio::join!(server_task, eviction_task, refresh_task);
    for (name, joined) in [
        ("command server", server),
        ("eviction sweep", eviction),
        ("filter refresh", refresh),
    ] {
        if let Err(e) = joined {
            error!("{} task failed: {}", name, e);
        }
    }
    Ok(())
}
