#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cinema_booking::{BookingEngine, BookingPolicy, CreateBookingRequest, RetryPolicy};
use cinema_core::{
    Amount, Clock, Hall, HallSeat, ManualClock, ReservationStore, SeatKind, SeatRef, Showtime, Wallet,
};
use cinema_store::{CatalogWriter, MemoryStore};
use uuid::Uuid;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn test_policy() -> BookingPolicy {
    BookingPolicy {
        store_timeout: StdDuration::from_secs(2),
        retry: RetryPolicy {
            max_retries: 5,
            initial_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(20),
            multiplier: 2.0,
        },
        ..BookingPolicy::default()
    }
}

/// Hall with `rows` x `per_row` seats and no surcharge
pub fn plain_hall(rows: usize, per_row: i32) -> Hall {
    let seats = (0..rows)
        .flat_map(|r| {
            let row = ((b'A' + r as u8) as char).to_string();
            (1..=per_row).map(move |n| HallSeat {
                row: row.clone(),
                number: n,
                kind: SeatKind::Regular,
                price: 0,
            })
        })
        .collect::<Vec<_>>();

    Hall {
        id: Uuid::new_v4(),
        name: "Hall 1".to_string(),
        capacity: seats.len() as i32,
        seats,
    }
}

pub struct World {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<BookingEngine>,
    pub hall: Hall,
    pub showtime_id: Uuid,
}

impl World {
    pub async fn new(hall: Hall, capacity: i32, base_price: Amount, starts_in: Duration) -> Self {
        let store = MemoryStore::new();
        Self::over(store.clone(), Arc::new(store), hall, capacity, base_price, starts_in).await
    }

    /// `engine_store` sees the same data as `store` but may wrap it
    pub async fn over(
        store: MemoryStore,
        engine_store: Arc<dyn ReservationStore>,
        hall: Hall,
        capacity: i32,
        base_price: Amount,
        starts_in: Duration,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let showtime = Showtime::new(hall.id, clock.now() + starts_in, base_price, capacity);

        store.put_hall(&hall).await.unwrap();
        store.put_showtime(&showtime).await.unwrap();

        let engine = Arc::new(BookingEngine::new(engine_store, clock.clone(), test_policy()));

        Self {
            store,
            clock,
            engine,
            hall,
            showtime_id: showtime.id,
        }
    }

    pub async fn user(&self, balance: Amount) -> Uuid {
        let user = Uuid::new_v4();
        self.store
            .put_wallet(&Wallet::empty(user, "KZT", self.clock.now()))
            .await
            .unwrap();
        if balance > 0 {
            self.engine.top_up(user, balance).await.unwrap();
        }
        user
    }

    pub fn request(&self, user_id: Uuid, seats: &[(&str, i32)], method: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            user_id,
            showtime_id: self.showtime_id,
            seats: seats.iter().map(|(r, n)| SeatRef::new(*r, *n)).collect(),
            payment_method: method.to_string(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn showtime(&self) -> Showtime {
        self.store.get_showtime(self.showtime_id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, user_id: Uuid) -> Amount {
        self.store.get_wallet(user_id).await.unwrap().unwrap().balance
    }
}
