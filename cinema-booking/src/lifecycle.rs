use std::sync::Arc;

use cinema_catalog::SeatInventory;
use cinema_core::{
    Booking, BookingError, BookingResult, BookingStatus, Clock, PaymentMethod, PaymentStatus,
    ReservationStore, StoreTransaction,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::identifiers;
use crate::ledger;
use crate::policy::BookingPolicy;
use crate::retry::run_unit;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CancellationReceipt {
    pub booking_id: Uuid,
    pub cancelled: bool,
}

/// Confirmation and cancellation of existing bookings
pub struct LifecycleManager {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

/// Lock the booking and hide other users' bookings behind `BookingNotFound`
async fn owned_booking(
    tx: &mut Box<dyn StoreTransaction>,
    user_id: Uuid,
    booking_id: Uuid,
) -> BookingResult<Booking> {
    tx.booking_for_update(booking_id)
        .await?
        .filter(|b| b.user_id == user_id)
        .ok_or(BookingError::BookingNotFound(booking_id))
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>, policy: BookingPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub async fn confirm_booking(&self, user_id: Uuid, booking_id: Uuid) -> BookingResult<Booking> {
        let booking = run_unit("confirm_booking", &self.policy.retry, self.policy.store_timeout, || {
            self.confirm(user_id, booking_id)
        })
        .await?;

        info!(booking_id = %booking.id, method = booking.payment.method.as_str(), "Booking confirmed");
        Ok(booking)
    }

    async fn confirm(&self, user_id: Uuid, booking_id: Uuid) -> BookingResult<Booking> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut booking = owned_booking(&mut tx, user_id, booking_id).await?;
        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed => return Err(BookingError::AlreadyConfirmed(booking_id)),
            BookingStatus::Cancelled => return Err(BookingError::AlreadyCancelled(booking_id)),
            BookingStatus::Expired => return Err(BookingError::Expired(booking_id)),
        }
        // Left for the sweep to expire
        if booking.is_past_deadline(now) {
            return Err(BookingError::Expired(booking_id));
        }

        let mut showtime = tx
            .showtime_for_update(booking.showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(booking.showtime_id))?;

        let entry = if booking.payment.method == PaymentMethod::Balance {
            let mut wallet = tx
                .wallet_for_update(user_id)
                .await?
                .ok_or(BookingError::WalletNotFound(user_id))?;
            let debit = ledger::debit_for_booking(&mut wallet, &booking, now)?;
            tx.save_wallet(&wallet).await?;
            debit
        } else {
            ledger::external_payment(&booking, now)
        };

        booking.mark_paid(now, identifiers::transaction_ref(now));

        let flipped = showtime.mark_booked(booking.id);
        if flipped != booking.seats.len() {
            warn!(
                booking_id = %booking.id,
                expected = booking.seats.len(),
                flipped,
                "Held seats out of step with booking"
            );
        }

        tx.update_booking(&booking).await?;
        tx.save_showtime(&showtime).await?;
        tx.append_ledger_entry(&entry).await?;
        tx.commit().await?;

        Ok(booking)
    }

    pub async fn cancel_booking(&self, user_id: Uuid, booking_id: Uuid) -> BookingResult<CancellationReceipt> {
        let refunded = run_unit("cancel_booking", &self.policy.retry, self.policy.store_timeout, || {
            self.cancel(user_id, booking_id)
        })
        .await?;

        info!(%booking_id, refunded, "Booking cancelled");
        Ok(CancellationReceipt {
            booking_id,
            cancelled: true,
        })
    }

    /// Returns whether money went back to the wallet
    async fn cancel(&self, user_id: Uuid, booking_id: Uuid) -> BookingResult<bool> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut booking = owned_booking(&mut tx, user_id, booking_id).await?;
        match booking.status {
            BookingStatus::Cancelled => return Err(BookingError::AlreadyCancelled(booking_id)),
            BookingStatus::Expired => return Err(BookingError::Expired(booking_id)),
            BookingStatus::Pending | BookingStatus::Confirmed => {}
        }

        let mut showtime = tx
            .showtime_for_update(booking.showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(booking.showtime_id))?;

        if now + self.policy.cancel_window > showtime.starts_at {
            return Err(BookingError::CancelWindowClosed {
                starts_at: showtime.starts_at,
            });
        }

        let seats = booking.seat_refs();
        let released = showtime.release(booking.id, &seats);
        if released != seats.len() {
            warn!(%booking_id, expected = seats.len(), released, "Released fewer seats than booked");
        }

        let refund = if booking.is_paid() {
            let mut wallet = tx
                .wallet_for_update(booking.user_id)
                .await?
                .ok_or(BookingError::WalletNotFound(booking.user_id))?;
            let entry = ledger::refund(&mut wallet, &booking, now);
            tx.save_wallet(&wallet).await?;
            booking.payment.status = PaymentStatus::Refunded;
            Some(entry)
        } else {
            None
        };

        booking.update_status(BookingStatus::Cancelled, now);

        tx.update_booking(&booking).await?;
        tx.save_showtime(&showtime).await?;
        if let Some(entry) = &refund {
            tx.append_ledger_entry(entry).await?;
        }
        tx.commit().await?;

        Ok(refund.is_some())
    }
}
