use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use tracklink::config::Config;
use tracklink::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting tracklink v{}", env!("CARGO_PKG_VERSION"));

    // Optional explicit config path; otherwise the platform config dir
    let config_path = std::env::var_os("TRACKLINK_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("tracklink listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
