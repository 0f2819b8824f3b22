use anyhow::Result;
use filedeck::config::Config;
use filedeck::{router, AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn setup() -> Result<(Config, AppState)> {
    let config = Config::from_env()?;
    let state = AppState::new(config.clone()).await?;
    Ok((config, state))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filedeck=info,tower_http=info".into()),
        )
        .init();

    let (config, state) = setup().await?;
    let app = router(state)?;

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        uploads = %config.upload_dir.display(),
        database = %config.database_path,
        assistant = config.gemini_api_key.is_some(),
        "listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
