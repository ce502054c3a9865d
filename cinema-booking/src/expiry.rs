use std::collections::HashSet;
use std::sync::Arc;

use cinema_catalog::SeatInventory;
use cinema_core::{BookingError, BookingResult, BookingStatus, Clock, ReservationStore};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::policy::BookingPolicy;
use crate::retry::{bounded, run_unit};

/// Used when a reconciler is built with a batch size of zero
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    /// Confirmed or cancelled between the scan and the lock
    pub skipped: usize,
    pub failed: usize,
}

/// Expires unpaid bookings past their hold deadline and frees their seats
pub struct ExpiryReconciler {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    batch_size: u32,
}

impl ExpiryReconciler {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        batch_size: u32,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            batch_size: if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size },
        }
    }

    /// Expire every overdue booking, `batch_size` candidates at a time.
    ///
    /// Runs until the store has no overdue booking left other than ones this
    /// sweep already handled. A booking that fails to expire is set aside for
    /// the rest of the sweep so it cannot hold back the ones behind it.
    pub async fn sweep(&self) -> BookingResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut seen: HashSet<Uuid> = HashSet::new();

        loop {
            let wanted = self.batch_size.saturating_add(u32::try_from(seen.len()).unwrap_or(u32::MAX));
            let candidates = bounded(
                "expired_pending_bookings",
                self.policy.store_timeout,
                self.store.expired_pending_bookings(now, wanted),
            )
            .await?;
            let exhausted = (candidates.len() as u64) < u64::from(wanted);

            let batch: Vec<Uuid> = candidates
                .into_iter()
                .filter(|id| !seen.contains(id))
                .take(self.batch_size as usize)
                .collect();
            if batch.is_empty() {
                break;
            }
            report.scanned += batch.len();

            for booking_id in batch {
                seen.insert(booking_id);
                match self.expire_booking(booking_id).await {
                    Ok(true) => report.expired += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        error!(%booking_id, error = %e, "Failed to expire booking");
                        report.failed += 1;
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Expire one booking if it is still pending and overdue under lock
    pub async fn expire_booking(&self, booking_id: Uuid) -> BookingResult<bool> {
        run_unit("expire_booking", &self.policy.retry, self.policy.store_timeout, || {
            self.expire(booking_id)
        })
        .await
    }

    async fn expire(&self, booking_id: Uuid) -> BookingResult<bool> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let Some(mut booking) = tx.booking_for_update(booking_id).await? else {
            return Err(BookingError::BookingNotFound(booking_id));
        };

        if booking.status != BookingStatus::Pending || !booking.is_past_deadline(now) {
            debug!(%booking_id, status = %booking.status, "Booking no longer expirable, skipping");
            return Ok(false);
        }

        let mut showtime = tx
            .showtime_for_update(booking.showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(booking.showtime_id))?;

        let seats = booking.seat_refs();
        let released = showtime.release(booking.id, &seats);
        if released != seats.len() {
            warn!(%booking_id, expected = seats.len(), released, "Released fewer seats than booked");
        }

        booking.update_status(BookingStatus::Expired, now);

        tx.update_booking(&booking).await?;
        tx.save_showtime(&showtime).await?;
        tx.commit().await?;

        debug!(%booking_id, released, "Booking expired");
        Ok(true)
    }
}
