use std::collections::HashSet;
use std::sync::Arc;

use cinema_catalog::{SeatInventory, SeatPricingResolver};
use cinema_core::{
    Booking, BookingError, BookingResult, BookingStatus, Clock, HeldSeatStatus, Payment,
    PaymentMethod, ReservationStore, SeatRef,
};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::identifiers;
use crate::ledger;
use crate::policy::BookingPolicy;
use crate::retry::run_unit;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub user_id: Uuid,
    pub showtime_id: Uuid,
    pub seats: Vec<SeatRef>,
    /// "balance", "card" or "cash"; "wallet" and "external-card" are accepted too
    pub payment_method: String,
}

/// Turns a seat request into a committed booking.
///
/// Availability check, pricing, optional wallet debit, booking insert and the
/// seat hold all happen inside one store transaction: either every effect is
/// committed or none is.
pub struct ReservationCoordinator {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    pricing: SeatPricingResolver,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>, policy: BookingPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            pricing: SeatPricingResolver::new(),
        }
    }

    /// Checks that need no store access
    pub fn validate(&self, request: &CreateBookingRequest) -> BookingResult<PaymentMethod> {
        let count = request.seats.len();
        if count == 0 || count > self.policy.max_seats {
            return Err(BookingError::InvalidSeatCount {
                requested: count,
                max: self.policy.max_seats,
            });
        }

        let mut seen = HashSet::with_capacity(count);
        if let Some(dup) = request.seats.iter().find(|s| !seen.insert(*s)) {
            return Err(BookingError::DuplicateSeat(dup.clone()));
        }

        request.payment_method.parse()
    }

    pub async fn create_booking(&self, request: &CreateBookingRequest) -> BookingResult<Booking> {
        let method = self.validate(request)?;

        let booking = run_unit("create_booking", &self.policy.retry, self.policy.store_timeout, || {
            self.reserve(request, method)
        })
        .await?;

        info!(
            booking_id = %booking.id,
            reference = %booking.reference,
            status = %booking.status,
            total = booking.total_amount,
            "Booking created"
        );
        Ok(booking)
    }

    async fn reserve(&self, request: &CreateBookingRequest, method: PaymentMethod) -> BookingResult<Booking> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut showtime = tx
            .showtime_for_update(request.showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(request.showtime_id))?;

        if showtime.starts_at <= now {
            return Err(BookingError::ShowtimeStarted(showtime.id));
        }

        // All or nothing: one taken seat fails the whole request
        showtime.ensure_available(&request.seats)?;

        let hall = tx.hall(showtime.hall_id).await?;
        if hall.is_none() {
            debug!(hall_id = %showtime.hall_id, "No seat table for hall, charging base price");
        }
        let quote = self.pricing.quote(&showtime, &request.seats, hall.as_ref());

        let reference = identifiers::booking_reference(now);
        let mut booking = Booking {
            id: Uuid::new_v4(),
            qr_token: identifiers::qr_token(&reference),
            reference,
            user_id: request.user_id,
            showtime_id: showtime.id,
            seats: quote.seats,
            total_amount: quote.total,
            currency: self.policy.currency.clone(),
            status: BookingStatus::Pending,
            payment: Payment::pending(method),
            expires_at: now + self.policy.hold_duration,
            created_at: now,
            updated_at: now,
        };

        let seat_status = if method == PaymentMethod::Balance {
            let mut wallet = tx
                .wallet_for_update(request.user_id)
                .await?
                .ok_or(BookingError::WalletNotFound(request.user_id))?;

            let debit = ledger::debit_for_booking(&mut wallet, &booking, now)?;
            booking.mark_paid(now, identifiers::transaction_ref(now));

            tx.save_wallet(&wallet).await?;
            tx.append_ledger_entry(&debit).await?;
            HeldSeatStatus::Booked
        } else {
            HeldSeatStatus::Reserved
        };

        showtime.hold(booking.id, &request.seats, seat_status)?;

        tx.insert_booking(&booking).await?;
        tx.save_showtime(&showtime).await?;
        tx.commit().await?;

        Ok(booking)
    }
}
