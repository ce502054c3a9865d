use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cinema_booking::{BookingEngine, BookingPolicy, RetryPolicy};
use cinema_core::{Clock, ReservationStore, SystemClock};
use cinema_store::app_config::BookingRules;
use cinema_store::{CatalogWriter, Config, DbClient, MemoryStore, PgReservationStore, StorageBackend};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
    pub catalog: Arc<dyn CatalogWriter>,
    pub config: Arc<Config>,
}

pub fn policy_from(rules: &BookingRules) -> BookingPolicy {
    let defaults = RetryPolicy::default();

    BookingPolicy {
        max_seats: rules.max_seats_per_booking,
        hold_duration: chrono::Duration::minutes(rules.hold_minutes),
        cancel_window: chrono::Duration::minutes(rules.cancel_window_minutes),
        store_timeout: Duration::from_millis(rules.store_timeout_ms),
        retry: RetryPolicy {
            max_retries: rules.max_conflict_retries,
            initial_delay: Duration::from_millis(rules.retry_initial_backoff_ms),
            ..defaults
        },
        currency: rules.currency.clone(),
    }
}

impl AppState {
    /// Connect the configured backend and wire the engine on top of it
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        Self::build_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn build_with_clock(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let (store, catalog): (Arc<dyn ReservationStore>, Arc<dyn CatalogWriter>) = match config.storage.backend {
            StorageBackend::Postgres => {
                let db = DbClient::new(&config.database)
                    .await
                    .context("Failed to connect to Postgres")?;
                db.migrate().await.context("Failed to run migrations")?;

                let pg = Arc::new(PgReservationStore::new(
                    &db,
                    Duration::from_millis(config.database.lock_timeout_ms),
                ));
                let store: Arc<dyn ReservationStore> = pg.clone();
                let catalog: Arc<dyn CatalogWriter> = pg;
                (store, catalog)
            }
            StorageBackend::Memory => {
                info!("Using in-memory store; data is lost on exit");
                let memory = Arc::new(MemoryStore::new());
                let store: Arc<dyn ReservationStore> = memory.clone();
                let catalog: Arc<dyn CatalogWriter> = memory;
                (store, catalog)
            }
        };

        let engine = Arc::new(BookingEngine::new(store, clock, policy_from(&config.booking)));

        Ok(Self {
            engine,
            catalog,
            config: Arc::new(config),
        })
    }
}
