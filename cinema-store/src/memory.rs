use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinema_core::{
    Booking, BookingError, BookingQuery, BookingResult, Hall, LedgerEntry, Page, ReservationStore,
    Showtime, StoreTransaction, Wallet,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::catalog::CatalogWriter;

#[derive(Debug, Default)]
struct MemoryState {
    halls: HashMap<Uuid, Hall>,
    showtimes: HashMap<Uuid, Showtime>,
    wallets: HashMap<Uuid, Wallet>,
    bookings: HashMap<Uuid, Booking>,
    references: HashSet<String>,
    ledger: Vec<LedgerEntry>,
}

impl MemoryState {
    fn entries_of(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }
}

/// Process-local store for tests and `backend = "memory"` runs.
///
/// A transaction owns the state lock from `begin` until it is committed or
/// dropped, so units of work are serialised. Writes are staged and applied
/// only on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct Staged {
    showtimes: HashMap<Uuid, Showtime>,
    wallets: HashMap<Uuid, Wallet>,
    bookings: HashMap<Uuid, Booking>,
    ledger: Vec<LedgerEntry>,
}

pub struct MemoryTransaction {
    state: OwnedMutexGuard<MemoryState>,
    staged: Staged,
}

impl MemoryTransaction {
    fn current_booking(&self, id: Uuid) -> Option<&Booking> {
        self.staged.bookings.get(&id).or_else(|| self.state.bookings.get(&id))
    }

    fn reference_taken(&self, reference: &str) -> bool {
        self.state.references.contains(reference)
            || self.staged.bookings.values().any(|b| b.reference == reference)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn showtime_for_update(&mut self, id: Uuid) -> BookingResult<Option<Showtime>> {
        Ok(self
            .staged
            .showtimes
            .get(&id)
            .or_else(|| self.state.showtimes.get(&id))
            .cloned())
    }

    async fn hall(&mut self, id: Uuid) -> BookingResult<Option<Hall>> {
        Ok(self.state.halls.get(&id).cloned())
    }

    async fn wallet_for_update(&mut self, user_id: Uuid) -> BookingResult<Option<Wallet>> {
        Ok(self
            .staged
            .wallets
            .get(&user_id)
            .or_else(|| self.state.wallets.get(&user_id))
            .cloned())
    }

    async fn booking_for_update(&mut self, id: Uuid) -> BookingResult<Option<Booking>> {
        Ok(self.current_booking(id).cloned())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> BookingResult<()> {
        if self.current_booking(booking.id).is_some() {
            return Err(BookingError::Contention(format!("booking id {} already exists", booking.id)));
        }
        if self.reference_taken(&booking.reference) {
            return Err(BookingError::Contention(format!(
                "booking reference {} already taken",
                booking.reference
            )));
        }

        self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> BookingResult<()> {
        if self.current_booking(booking.id).is_none() {
            return Err(BookingError::BookingNotFound(booking.id));
        }

        self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn save_showtime(&mut self, showtime: &Showtime) -> BookingResult<()> {
        let stored_version = self
            .staged
            .showtimes
            .get(&showtime.id)
            .or_else(|| self.state.showtimes.get(&showtime.id))
            .map(|s| s.version)
            .ok_or(BookingError::ShowtimeNotFound(showtime.id))?;

        if stored_version != showtime.version {
            return Err(BookingError::Contention(format!(
                "showtime {} changed: expected version {}, found {}",
                showtime.id, showtime.version, stored_version
            )));
        }

        let mut next = showtime.clone();
        next.version += 1;
        self.staged.showtimes.insert(next.id, next);
        Ok(())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> BookingResult<()> {
        let known = self.staged.wallets.contains_key(&wallet.user_id)
            || self.state.wallets.contains_key(&wallet.user_id);
        if !known {
            return Err(BookingError::WalletNotFound(wallet.user_id));
        }
        if wallet.balance < 0 {
            return Err(BookingError::Store(format!(
                "wallet of user {} would go negative",
                wallet.user_id
            )));
        }

        self.staged.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> BookingResult<()> {
        self.staged.ledger.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> BookingResult<()> {
        let MemoryTransaction { mut state, staged } = *self;

        state.showtimes.extend(staged.showtimes);
        state.wallets.extend(staged.wallets);
        for (id, booking) in staged.bookings {
            state.references.insert(booking.reference.clone());
            state.bookings.insert(id, booking);
        }
        state.ledger.extend(staged.ledger);

        Ok(())
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            state,
            staged: Staged::default(),
        }))
    }

    async fn get_booking(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, query: &BookingQuery) -> BookingResult<Page<Booking>> {
        let state = self.state.lock().await;

        let mut matching: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == query.user_id)
            .filter(|b| query.status.map_or(true, |s| b.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.page_size as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn expired_pending_bookings(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> BookingResult<Vec<Uuid>> {
        let state = self.state.lock().await;

        let mut expired: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == cinema_core::BookingStatus::Pending && b.expires_at < now)
            .collect();
        expired.sort_by_key(|b| b.expires_at);

        Ok(expired.into_iter().take(limit as usize).map(|b| b.id).collect())
    }

    async fn get_showtime(&self, id: Uuid) -> BookingResult<Option<Showtime>> {
        Ok(self.state.lock().await.showtimes.get(&id).cloned())
    }

    async fn get_wallet(&self, user_id: Uuid) -> BookingResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&user_id).cloned())
    }

    async fn ledger_entries(&self, user_id: Uuid) -> BookingResult<Vec<LedgerEntry>> {
        Ok(self.state.lock().await.entries_of(user_id))
    }

    async fn statement(&self, user_id: Uuid) -> BookingResult<Option<(Wallet, Vec<LedgerEntry>)>> {
        let state = self.state.lock().await;

        Ok(state
            .wallets
            .get(&user_id)
            .map(|wallet| (wallet.clone(), state.entries_of(user_id))))
    }
}

#[async_trait]
impl CatalogWriter for MemoryStore {
    async fn put_hall(&self, hall: &Hall) -> BookingResult<()> {
        self.state.lock().await.halls.insert(hall.id, hall.clone());
        Ok(())
    }

    async fn put_showtime(&self, showtime: &Showtime) -> BookingResult<()> {
        self.state.lock().await.showtimes.insert(showtime.id, showtime.clone());
        Ok(())
    }

    async fn put_wallet(&self, wallet: &Wallet) -> BookingResult<()> {
        self.state.lock().await.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cinema_core::{
        BookingSeat, BookingStatus, EntryStatus, HeldSeat, HeldSeatStatus, LedgerKind, Payment,
        PaymentMethod, SeatRef,
    };

    fn booking(user_id: Uuid, showtime_id: Uuid, reference: &str, created_at: DateTime<Utc>) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            user_id,
            showtime_id,
            seats: vec![BookingSeat { row: "A".into(), number: 1, price: 2000 }],
            total_amount: 2000,
            currency: "KZT".into(),
            status: BookingStatus::Pending,
            payment: Payment::pending(PaymentMethod::Card),
            qr_token: format!("QR-{}", reference),
            expires_at: created_at + Duration::minutes(15),
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let show = Showtime::new(Uuid::new_v4(), Utc::now() + Duration::days(1), 2000, 10);
        store.put_showtime(&show).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let mut loaded = tx.showtime_for_update(show.id).await.unwrap().unwrap();
            loaded.held_seats.push(HeldSeat {
                seat: SeatRef::new("A", 1),
                booking_id: Uuid::new_v4(),
                status: HeldSeatStatus::Reserved,
            });
            loaded.available_seats -= 1;
            tx.save_showtime(&loaded).await.unwrap();
            tx.insert_booking(&booking(Uuid::new_v4(), show.id, "BK-1", Utc::now())).await.unwrap();
            // dropped without commit
        }

        let stored = store.get_showtime(show.id).await.unwrap().unwrap();
        assert!(stored.held_seats.is_empty());
        assert_eq!(stored.available_seats, 10);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_commit_applies_everything() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.put_wallet(&Wallet::empty(user, "KZT", Utc::now())).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut wallet = tx.wallet_for_update(user).await.unwrap().unwrap();
        wallet.balance = 500;
        tx.save_wallet(&wallet).await.unwrap();
        tx.append_ledger_entry(&LedgerEntry {
            id: Uuid::new_v4(),
            user_id: user,
            kind: LedgerKind::TopUp,
            amount: 500,
            booking_id: None,
            status: EntryStatus::Completed,
            description: "top-up".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_wallet(user).await.unwrap().unwrap().balance, 500);
        assert_eq!(store.ledger_entries(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_showtime_version_is_contention() {
        let store = MemoryStore::new();
        let show = Showtime::new(Uuid::new_v4(), Utc::now(), 2000, 10);
        store.put_showtime(&show).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let loaded = tx.showtime_for_update(show.id).await.unwrap().unwrap();
        tx.save_showtime(&loaded).await.unwrap();

        // Second write from the same stale copy
        let err = tx.save_showtime(&loaded).await.unwrap_err();
        assert!(matches!(err, BookingError::Contention(_)));
    }

    #[tokio::test]
    async fn test_duplicate_reference_is_rejected() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.insert_booking(&booking(user, Uuid::new_v4(), "BK-20260201-000001", Utc::now())).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_booking(&booking(user, Uuid::new_v4(), "BK-20260201-000001", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Contention(_)));
    }

    #[tokio::test]
    async fn test_list_bookings_pages_newest_first() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let base = Utc::now();

        let mut tx = store.begin().await.unwrap();
        for i in 0..12 {
            let b = booking(user, Uuid::new_v4(), &format!("BK-{}", i), base + Duration::seconds(i));
            tx.insert_booking(&b).await.unwrap();
        }
        tx.insert_booking(&booking(Uuid::new_v4(), Uuid::new_v4(), "BK-other", base)).await.unwrap();
        tx.commit().await.unwrap();

        let page = store
            .list_bookings(&BookingQuery::new(user, None, 2, 5))
            .await
            .unwrap();
        assert_eq!(page.total, 12);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].reference, "BK-6");

        let filtered = store
            .list_bookings(&BookingQuery::new(user, Some(BookingStatus::Confirmed), 1, 10))
            .await
            .unwrap();
        assert_eq!(filtered.total, 0);

        let far = store
            .list_bookings(&BookingQuery::new(user, None, u32::MAX, 50))
            .await
            .unwrap();
        assert_eq!(far.total, 12);
        assert!(far.items.is_empty());
    }

    #[tokio::test]
    async fn test_statement_snapshot() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        assert!(store.statement(user).await.unwrap().is_none());

        store.put_wallet(&Wallet::empty(user, "KZT", Utc::now())).await.unwrap();
        let (wallet, entries) = store.statement(user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 0);
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_expired_pending_scan() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let stale = booking(Uuid::new_v4(), Uuid::new_v4(), "BK-stale", now - Duration::minutes(30));
        let fresh = booking(Uuid::new_v4(), Uuid::new_v4(), "BK-fresh", now);
        tx.insert_booking(&stale).await.unwrap();
        tx.insert_booking(&fresh).await.unwrap();
        tx.commit().await.unwrap();

        let ids = store.expired_pending_bookings(now, 10).await.unwrap();
        assert_eq!(ids, vec![stale.id]);
    }
}
