use std::sync::Arc;

use cinema_core::{
    Amount, Booking, BookingError, BookingQuery, BookingResult, BookingStatus, Clock, LedgerEntry,
    Page, ReservationStore, Wallet,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::coordinator::{CreateBookingRequest, ReservationCoordinator};
use crate::expiry::ExpiryReconciler;
use crate::ledger;
use crate::lifecycle::{CancellationReceipt, LifecycleManager};
use crate::policy::BookingPolicy;
use crate::retry::{bounded, run_unit};

/// Entry point for every booking and wallet operation
pub struct BookingEngine {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    coordinator: ReservationCoordinator,
    lifecycle: LifecycleManager,
}

impl BookingEngine {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>, policy: BookingPolicy) -> Self {
        Self {
            coordinator: ReservationCoordinator::new(store.clone(), clock.clone(), policy.clone()),
            lifecycle: LifecycleManager::new(store.clone(), clock.clone(), policy.clone()),
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, showtime_id = %request.showtime_id, seats = request.seats.len())
    )]
    pub async fn create_booking(&self, request: CreateBookingRequest) -> BookingResult<Booking> {
        self.coordinator.create_booking(&request).await
    }

    #[instrument(skip(self))]
    pub async fn confirm_booking(&self, user_id: Uuid, booking_id: Uuid) -> BookingResult<Booking> {
        self.lifecycle.confirm_booking(user_id, booking_id).await
    }

    #[instrument(skip(self))]
    pub async fn cancel_booking(&self, user_id: Uuid, booking_id: Uuid) -> BookingResult<CancellationReceipt> {
        self.lifecycle.cancel_booking(user_id, booking_id).await
    }

    /// A user's bookings, newest first
    #[instrument(skip(self))]
    pub async fn list_bookings(
        &self,
        user_id: Uuid,
        status: Option<BookingStatus>,
        page: u32,
        page_size: u32,
    ) -> BookingResult<Page<Booking>> {
        let query = BookingQuery::new(user_id, status, page, page_size);
        bounded("list_bookings", self.policy.store_timeout, self.store.list_bookings(&query)).await
    }

    /// Credit the wallet from an external source
    #[instrument(skip(self))]
    pub async fn top_up(&self, user_id: Uuid, amount: Amount) -> BookingResult<Wallet> {
        if amount <= 0 || amount > ledger::MAX_TOP_UP {
            return Err(BookingError::InvalidAmount(amount));
        }

        let wallet = run_unit("top_up", &self.policy.retry, self.policy.store_timeout, || async move {
            let now = self.clock.now();
            let mut tx = self.store.begin().await?;

            let mut wallet = tx
                .wallet_for_update(user_id)
                .await?
                .ok_or(BookingError::WalletNotFound(user_id))?;
            let entry = ledger::top_up(&mut wallet, amount, now)?;

            tx.save_wallet(&wallet).await?;
            tx.append_ledger_entry(&entry).await?;
            tx.commit().await?;
            Ok(wallet)
        })
        .await?;

        info!(%user_id, amount, balance = wallet.balance, "Wallet topped up");
        Ok(wallet)
    }

    /// Current wallet with every ledger entry of the user in creation order
    pub async fn statement(&self, user_id: Uuid) -> BookingResult<(Wallet, Vec<LedgerEntry>)> {
        bounded("statement", self.policy.store_timeout, self.store.statement(user_id))
            .await?
            .ok_or(BookingError::WalletNotFound(user_id))
    }

    pub fn expiry_reconciler(&self, batch_size: u32) -> ExpiryReconciler {
        ExpiryReconciler::new(self.store.clone(), self.clock.clone(), self.policy.clone(), batch_size)
    }
}
