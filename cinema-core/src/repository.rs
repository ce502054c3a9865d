use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BookingResult;
use crate::models::{Booking, BookingQuery, Hall, LedgerEntry, Page, Showtime, Wallet};

/// Durable home of inventory, bookings, wallets and the ledger.
///
/// Every multi-record mutation goes through a [`StoreTransaction`] obtained
/// from [`ReservationStore::begin`]; the plain read methods are for queries
/// that do not feed a write.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>>;

    async fn get_booking(&self, id: Uuid) -> BookingResult<Option<Booking>>;

    async fn list_bookings(&self, query: &BookingQuery) -> BookingResult<Page<Booking>>;

    /// Ids of pending bookings whose hold deadline is before `now`, oldest first
    async fn expired_pending_bookings(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> BookingResult<Vec<Uuid>>;

    async fn get_showtime(&self, id: Uuid) -> BookingResult<Option<Showtime>>;

    async fn get_wallet(&self, user_id: Uuid) -> BookingResult<Option<Wallet>>;

    /// Ledger entries of a user ordered by creation time
    async fn ledger_entries(&self, user_id: Uuid) -> BookingResult<Vec<LedgerEntry>>;

    /// Wallet and ledger entries read from one consistent snapshot.
    /// `None` if the user has no wallet.
    async fn statement(&self, user_id: Uuid) -> BookingResult<Option<(Wallet, Vec<LedgerEntry>)>>;
}

/// One atomic unit of work.
///
/// Reads ending in `_for_update` lock the record until the transaction ends.
/// Nothing written here is visible to others before [`StoreTransaction::commit`];
/// dropping the transaction discards it.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn showtime_for_update(&mut self, id: Uuid) -> BookingResult<Option<Showtime>>;

    async fn hall(&mut self, id: Uuid) -> BookingResult<Option<Hall>>;

    async fn wallet_for_update(&mut self, user_id: Uuid) -> BookingResult<Option<Wallet>>;

    async fn booking_for_update(&mut self, id: Uuid) -> BookingResult<Option<Booking>>;

    async fn insert_booking(&mut self, booking: &Booking) -> BookingResult<()>;

    async fn update_booking(&mut self, booking: &Booking) -> BookingResult<()>;

    /// Persist the held-seat set and counter. Fails with `Contention` if the
    /// stored version no longer matches `showtime.version`.
    async fn save_showtime(&mut self, showtime: &Showtime) -> BookingResult<()>;

    async fn save_wallet(&mut self, wallet: &Wallet) -> BookingResult<()>;

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> BookingResult<()>;

    async fn commit(self: Box<Self>) -> BookingResult<()>;
}
