use anyhow::Context;
use clap::Parser;
use neuroscan::{
    config::{Cli, Settings},
    server::{AppState, router},
    telemetry,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli).context("invalid configuration")?;
    telemetry::init_tracing(&settings.log);

    let state = AppState::open(&settings).with_context(|| {
        format!("cannot open storage directory {}", settings.storage.dir.display())
    })?;
    let app = router(state, &settings.server);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("cannot bind {}", settings.server.bind))?;
    info!(
        addr = %settings.server.bind,
        storage = %settings.storage.dir.display(),
        cache_max_bytes = settings.cache.max_bytes,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
