use cinema_booking::ExpiryReconciler;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

/// Sweep expired holds every `every` until `shutdown` flips to true or its
/// sender is dropped.
pub async fn run_expiry_worker(
    reconciler: ExpiryReconciler,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = every.as_secs_f64(), "Expiry worker started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match reconciler.sweep().await {
                    Ok(report) => debug!(
                        scanned = report.scanned,
                        expired = report.expired,
                        failed = report.failed,
                        "Sweep tick"
                    ),
                    Err(e) => error!(error = %e, "Expiry sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Expiry worker stopped");
}
