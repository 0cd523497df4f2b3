use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use ferry_server::config::Config;
use ferry_server::routes::AppState;
use ferry_server::session::SessionRegistry;
use ferry_server::storage::{ChunkStore, human_size};
use ferry_server::{cleanup, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=debug,tower_http=debug".into()),
        )
        .init();

    let config = Arc::new(Config::from_env());

    let registry = Arc::new(SessionRegistry::new(config.max_sessions));
    let store = Arc::new(
        ChunkStore::new(config.staging_dir.clone(), config.download_dir.clone()).await?,
    );

    // Session reaper runs on its own timer, independent of traffic.
    tokio::spawn(cleanup::run_reaper_loop(
        registry.clone(),
        store.clone(),
        config.reap_interval_secs,
        Duration::from_secs(config.session_timeout_secs),
    ));

    let state = AppState {
        registry,
        store,
        config: config.clone(),
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Ferry file transfer server listening on {}", addr);
    info!(
        "Chunk size: {}, session timeout: {}s, sweep every {}s",
        human_size(config.chunk_size),
        config.session_timeout_secs,
        config.reap_interval_secs
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
