use std::sync::Arc;

use anyhow::Context;
use tick_normalizer::{app_context::AppContext, config::Config, server};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() -> anyhow::Result<()> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse()?),
    );
    tracing_subscriber::registry().with(log_layer).init();
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut term = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl+c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing()?;
    info!("Starting tick normalizer...");

    let config = Config::init_with_defaults().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let context = Arc::new(AppContext::new(&config).await?);

    // Health and metrics server
    let router = server::with_metrics_route(server::router(context.health_registry.clone()))
        .context("failed to install metrics recorder")?;
    let bind = config.bind_address();
    tokio::spawn(async move {
        if let Err(e) = server::serve(router, &bind).await {
            error!("health server stopped: {e}");
        }
    });

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("{e:#}");
        }
        info!("Shutdown signal received");
        _ = shutdown_tx.send(true);
    });

    let sweeper = context.spawn_guard_sweeper(shutdown_rx.clone());

    let result = context.run(shutdown_rx).await;
    sweeper.abort();

    match &result {
        Ok(()) => info!("Tick normalizer shut down"),
        Err(e) => error!("Tick normalizer stopped: {e:#}"),
    }
    result
}
