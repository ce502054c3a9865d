use std::time::Duration;

use anyhow::Context;
use cinema_app::{seed, worker::run_expiry_worker, AppState};
use cinema_store::Config;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinema_app=debug,cinema_booking=debug,cinema_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!(backend = ?config.storage.backend, "Starting cinema booking engine");

    let state = AppState::build(config).await?;

    if state.config.seed.on_startup {
        let ctx = seed::run(&state.engine, state.catalog.as_ref())
            .await
            .context("Failed to seed demo data")?;
        tracing::info!(
            users = ctx.users.len(),
            showtimes = ctx.showtimes.len(),
            bookings = ctx.bookings.len(),
            "Demo data ready"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_expiry_worker(
        state.engine.expiry_reconciler(state.config.expiry.batch_size),
        Duration::from_secs(state.config.expiry.sweep_interval_seconds),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    let _ = shutdown_tx.send(true);
    sweeper.await.context("Expiry worker panicked")?;

    Ok(())
}
