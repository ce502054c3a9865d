//! Failure injection: a unit of work that breaks halfway must leave no trace.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cinema_booking::BookingEngine;
use cinema_core::{
    Booking, BookingError, BookingQuery, BookingResult, BookingStatus, Hall, HeldSeatStatus,
    LedgerEntry, Page, ReservationStore, Showtime, StoreTransaction, Wallet,
};
use cinema_store::{CatalogWriter, MemoryStore};
use common::{plain_hall, test_policy, World};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailPoint {
    InsertBooking,
    UpdateBooking,
    SaveShowtime,
    SaveWallet,
    AppendLedger,
    Commit,
}

#[derive(Default)]
struct Faults {
    fail_at: Option<FailPoint>,
    /// Remaining injected contention errors on save_showtime
    contention: AtomicU32,
    /// Stall inside the transaction after locking the showtime
    latency: Option<StdDuration>,
}

/// Store wrapper that breaks transactions on demand
struct FailingStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

struct FailingTransaction {
    inner: Box<dyn StoreTransaction>,
    faults: Arc<Faults>,
}

impl FailingTransaction {
    fn check(&self, point: FailPoint) -> BookingResult<()> {
        if self.faults.fail_at == Some(point) {
            return Err(BookingError::Store(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for FailingTransaction {
    async fn showtime_for_update(&mut self, id: Uuid) -> BookingResult<Option<Showtime>> {
        let showtime = self.inner.showtime_for_update(id).await?;
        if let Some(latency) = self.faults.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(showtime)
    }

    async fn hall(&mut self, id: Uuid) -> BookingResult<Option<Hall>> {
        self.inner.hall(id).await
    }

    async fn wallet_for_update(&mut self, user_id: Uuid) -> BookingResult<Option<Wallet>> {
        self.inner.wallet_for_update(user_id).await
    }

    async fn booking_for_update(&mut self, id: Uuid) -> BookingResult<Option<Booking>> {
        self.inner.booking_for_update(id).await
    }

    async fn insert_booking(&mut self, booking: &Booking) -> BookingResult<()> {
        self.check(FailPoint::InsertBooking)?;
        self.inner.insert_booking(booking).await
    }

    async fn update_booking(&mut self, booking: &Booking) -> BookingResult<()> {
        self.check(FailPoint::UpdateBooking)?;
        self.inner.update_booking(booking).await
    }

    async fn save_showtime(&mut self, showtime: &Showtime) -> BookingResult<()> {
        self.check(FailPoint::SaveShowtime)?;
        let injected = self
            .faults
            .contention
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BookingError::Contention("injected version conflict".into()));
        }
        self.inner.save_showtime(showtime).await
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> BookingResult<()> {
        self.check(FailPoint::SaveWallet)?;
        self.inner.save_wallet(wallet).await
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> BookingResult<()> {
        self.check(FailPoint::AppendLedger)?;
        self.inner.append_ledger_entry(entry).await
    }

    async fn commit(self: Box<Self>) -> BookingResult<()> {
        self.check(FailPoint::Commit)?;
        self.inner.commit().await
    }
}

#[async_trait]
impl ReservationStore for FailingStore {
    async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(FailingTransaction {
            inner: self.inner.begin().await?,
            faults: self.faults.clone(),
        }))
    }

    async fn get_booking(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        self.inner.get_booking(id).await
    }

    async fn list_bookings(&self, query: &BookingQuery) -> BookingResult<Page<Booking>> {
        self.inner.list_bookings(query).await
    }

    async fn expired_pending_bookings(&self, now: DateTime<Utc>, limit: u32) -> BookingResult<Vec<Uuid>> {
        self.inner.expired_pending_bookings(now, limit).await
    }

    async fn get_showtime(&self, id: Uuid) -> BookingResult<Option<Showtime>> {
        self.inner.get_showtime(id).await
    }

    async fn get_wallet(&self, user_id: Uuid) -> BookingResult<Option<Wallet>> {
        self.inner.get_wallet(user_id).await
    }

    async fn ledger_entries(&self, user_id: Uuid) -> BookingResult<Vec<LedgerEntry>> {
        self.inner.ledger_entries(user_id).await
    }

    async fn statement(&self, user_id: Uuid) -> BookingResult<Option<(Wallet, Vec<LedgerEntry>)>> {
        self.inner.statement(user_id).await
    }
}

/// Faulty engine in `world`, plus a healthy engine over the same data
struct Harness {
    world: World,
    healthy: BookingEngine,
}

impl Harness {
    async fn new(faults: Faults) -> Self {
        let store = MemoryStore::new();
        let failing = Arc::new(FailingStore {
            inner: store.clone(),
            faults: Arc::new(faults),
        });
        let world = World::over(store, failing, plain_hall(1, 10), 10, 1000, Duration::days(1)).await;
        let healthy = BookingEngine::new(Arc::new(world.store.clone()), world.clock.clone(), test_policy());

        Self { world, healthy }
    }

    async fn user(&self, balance: i64) -> Uuid {
        let user = Uuid::new_v4();
        self.world
            .store
            .put_wallet(&Wallet::empty(user, "KZT", self.world.now()))
            .await
            .unwrap();
        self.healthy.top_up(user, balance).await.unwrap();
        user
    }

    async fn book(&self, user: Uuid, seats: &[(&str, i32)]) -> Booking {
        self.healthy
            .create_booking(self.world.request(user, seats, "balance"))
            .await
            .unwrap()
    }

    async fn assert_untouched(&self, user: Uuid, balance: i64, held: usize, entries: usize) {
        let show = self.world.showtime().await;
        assert_eq!(show.held_seats.len(), held);
        assert_eq!(show.available_seats, 10 - held as i32);

        let (wallet, ledger) = self.healthy.statement(user).await.unwrap();
        assert_eq!(wallet.balance, balance);
        assert_eq!(ledger.len(), entries);
    }
}

#[tokio::test]
async fn test_create_fails_at_every_write_step() {
    for point in [
        FailPoint::InsertBooking,
        FailPoint::SaveShowtime,
        FailPoint::SaveWallet,
        FailPoint::AppendLedger,
        FailPoint::Commit,
    ] {
        let h = Harness::new(Faults {
            fail_at: Some(point),
            ..Faults::default()
        })
        .await;
        let user = h.user(5000).await;

        let err = h
            .world
            .engine
            .create_booking(h.world.request(user, &[("A", 1), ("A", 2)], "balance"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Store(_)), "{:?}: {}", point, err);

        h.assert_untouched(user, 5000, 0, 1).await;
        assert_eq!(h.healthy.list_bookings(user, None, 1, 10).await.unwrap().total, 0);

        // The store is not wedged: the same seats sell fine afterwards
        h.book(user, &[("A", 1), ("A", 2)]).await;
        h.assert_untouched(user, 3000, 2, 2).await;
    }
}

#[tokio::test]
async fn test_cancel_fails_midway_keeps_booking_paid() {
    for point in [
        FailPoint::UpdateBooking,
        FailPoint::SaveShowtime,
        FailPoint::SaveWallet,
        FailPoint::AppendLedger,
        FailPoint::Commit,
    ] {
        let h = Harness::new(Faults {
            fail_at: Some(point),
            ..Faults::default()
        })
        .await;
        let user = h.user(5000).await;
        let booking = h.book(user, &[("A", 3)]).await;

        let err = h.world.engine.cancel_booking(user, booking.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Store(_)), "{:?}: {}", point, err);

        let stored = h.world.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        h.assert_untouched(user, 4000, 1, 2).await;
    }
}

#[tokio::test]
async fn test_confirm_fails_midway_keeps_booking_pending() {
    for point in [FailPoint::UpdateBooking, FailPoint::SaveShowtime, FailPoint::AppendLedger, FailPoint::Commit] {
        let h = Harness::new(Faults {
            fail_at: Some(point),
            ..Faults::default()
        })
        .await;
        let user = h.user(100).await;
        let booking = h
            .healthy
            .create_booking(h.world.request(user, &[("A", 8)], "card"))
            .await
            .unwrap();

        let err = h.world.engine.confirm_booking(user, booking.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Store(_)), "{:?}: {}", point, err);

        let stored = h.world.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(h.world.showtime().await.held_seats[0].status, HeldSeatStatus::Reserved);
        h.assert_untouched(user, 100, 1, 1).await;
    }
}

#[tokio::test]
async fn test_injected_contention_is_retried() {
    let h = Harness::new(Faults {
        contention: AtomicU32::new(2),
        ..Faults::default()
    })
    .await;
    let user = h.user(5000).await;

    let booking = h
        .world
        .engine
        .create_booking(h.world.request(user, &[("A", 5)], "balance"))
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);
    h.assert_untouched(user, 4000, 1, 2).await;
}

#[tokio::test]
async fn test_contention_beyond_budget_is_surfaced() {
    let h = Harness::new(Faults {
        contention: AtomicU32::new(100),
        ..Faults::default()
    })
    .await;
    let user = h.user(5000).await;

    let err = h
        .world
        .engine
        .create_booking(h.world.request(user, &[("A", 5)], "balance"))
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::Contention(_)));
    assert!(err.is_retryable());
    h.assert_untouched(user, 5000, 0, 1).await;
}

#[tokio::test]
async fn test_slow_store_times_out_without_partial_state() {
    let h = Harness::new(Faults {
        latency: Some(StdDuration::from_secs(10)),
        ..Faults::default()
    })
    .await;
    let user = h.user(5000).await;

    let err = h
        .world
        .engine
        .create_booking(h.world.request(user, &[("A", 7)], "balance"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::StoreTimeout(_)));
    assert!(err.is_retryable());

    // The abandoned transaction released its lock
    h.assert_untouched(user, 5000, 0, 1).await;
    h.book(user, &[("A", 7)]).await;
}
