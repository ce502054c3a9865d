use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinema_core::{
    Booking, BookingError, BookingQuery, BookingResult, BookingSeat, Hall, HallSeat, HeldSeat,
    LedgerEntry, Page, Payment, ReservationStore, SeatRef, Showtime, StoreTransaction, Wallet,
};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::CatalogWriter;
use crate::database::DbClient;

/// Translate a driver error into the booking error taxonomy.
///
/// Serialization failures, deadlocks and unique-key races are contention and
/// get retried by the engine; lock and statement timeouts surface as
/// `StoreTimeout`.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> BookingError {
    match &err {
        sqlx::Error::PoolTimedOut => BookingError::StoreTimeout("connection pool exhausted".into()),
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            BookingError::StoreUnavailable(err.to_string())
        }
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001") | Some("40P01") | Some("23505") => {
                BookingError::Contention(db.message().to_string())
            }
            Some("55P03") | Some("57014") => BookingError::StoreTimeout(db.message().to_string()),
            _ => BookingError::Store(err.to_string()),
        },
        _ => BookingError::Store(err.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct ShowtimeRow {
    id: Uuid,
    hall_id: Uuid,
    starts_at: DateTime<Utc>,
    base_price: i64,
    capacity: i32,
    available_seats: i32,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct HeldSeatRow {
    seat_row: String,
    seat_number: i32,
    booking_id: Uuid,
    status: String,
}

#[derive(sqlx::FromRow)]
struct HallRow {
    id: Uuid,
    name: String,
    capacity: i32,
    seats: Json<Vec<HallSeat>>,
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    reference: String,
    user_id: Uuid,
    showtime_id: Uuid,
    seats: Json<Vec<BookingSeat>>,
    total_amount: i64,
    currency: String,
    status: String,
    payment_method: String,
    payment_status: String,
    paid_at: Option<DateTime<Utc>>,
    transaction_ref: Option<String>,
    qr_token: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    user_id: Uuid,
    balance: i64,
    currency: String,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    amount: i64,
    booking_id: Option<Uuid>,
    status: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<HeldSeatRow> for HeldSeat {
    type Error = BookingError;

    fn try_from(row: HeldSeatRow) -> Result<Self, Self::Error> {
        Ok(HeldSeat {
            seat: SeatRef::new(row.seat_row, row.seat_number),
            booking_id: row.booking_id,
            status: row.status.parse()?,
        })
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = BookingError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            reference: row.reference,
            user_id: row.user_id,
            showtime_id: row.showtime_id,
            seats: row.seats.0,
            total_amount: row.total_amount,
            currency: row.currency,
            status: row.status.parse()?,
            payment: Payment {
                method: row.payment_method.parse()?,
                status: row.payment_status.parse()?,
                paid_at: row.paid_at,
                transaction_ref: row.transaction_ref,
            },
            qr_token: row.qr_token,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            user_id: row.user_id,
            balance: row.balance,
            currency: row.currency,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = BookingError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse()?,
            amount: row.amount,
            booking_id: row.booking_id,
            status: row.status.parse()?,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

const BOOKING_COLUMNS: &str = "id, reference, user_id, showtime_id, seats, total_amount, currency, status, \
     payment_method, payment_status, paid_at, transaction_ref, qr_token, expires_at, created_at, updated_at";

async fn load_held_seats(conn: &mut PgConnection, showtime_id: Uuid) -> BookingResult<Vec<HeldSeat>> {
    let rows = sqlx::query_as::<_, HeldSeatRow>(
        "SELECT seat_row, seat_number, booking_id, status FROM held_seats \
         WHERE showtime_id = $1 ORDER BY seat_row, seat_number",
    )
    .bind(showtime_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    rows.into_iter().map(HeldSeat::try_from).collect()
}

async fn load_showtime(conn: &mut PgConnection, id: Uuid, lock: bool) -> BookingResult<Option<Showtime>> {
    let sql = if lock {
        "SELECT id, hall_id, starts_at, base_price, capacity, available_seats, version \
         FROM showtimes WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, hall_id, starts_at, base_price, capacity, available_seats, version \
         FROM showtimes WHERE id = $1"
    };

    let row = sqlx::query_as::<_, ShowtimeRow>(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let held_seats = load_held_seats(conn, id).await?;
    Ok(Some(Showtime {
        id: row.id,
        hall_id: row.hall_id,
        starts_at: row.starts_at,
        base_price: row.base_price,
        capacity: row.capacity,
        available_seats: row.available_seats,
        held_seats,
        version: row.version,
    }))
}

async fn load_booking(conn: &mut PgConnection, id: Uuid, lock: bool) -> BookingResult<Option<Booking>> {
    let sql = format!(
        "SELECT {} FROM bookings WHERE id = $1{}",
        BOOKING_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );

    let row = sqlx::query_as::<_, BookingRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    row.map(Booking::try_from).transpose()
}

async fn load_wallet(conn: &mut PgConnection, user_id: Uuid, lock: bool) -> BookingResult<Option<Wallet>> {
    let sql = if lock {
        "SELECT user_id, balance, currency, updated_at FROM wallets WHERE user_id = $1 FOR UPDATE"
    } else {
        "SELECT user_id, balance, currency, updated_at FROM wallets WHERE user_id = $1"
    };

    let row = sqlx::query_as::<_, WalletRow>(sql)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    Ok(row.map(Wallet::from))
}

async fn load_ledger_entries(conn: &mut PgConnection, user_id: Uuid) -> BookingResult<Vec<LedgerEntry>> {
    let rows = sqlx::query_as::<_, LedgerRow>(
        "SELECT id, user_id, kind, amount, booking_id, status, description, created_at \
         FROM ledger_entries WHERE user_id = $1 ORDER BY created_at, id",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    rows.into_iter().map(LedgerEntry::try_from).collect()
}

/// Row changes that turn one held-seat set into another
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct HeldSeatDiff<'a> {
    /// Rows to delete, keyed by the booking that held them
    pub released: Vec<&'a HeldSeat>,
    /// Rows to insert
    pub added: Vec<&'a HeldSeat>,
    /// Same seat and booking, new status
    pub restated: Vec<&'a HeldSeat>,
}

/// Compare held seats by seat. A seat that moved to another booking is
/// released and added again.
pub(crate) fn diff_held_seats<'a>(before: &'a [HeldSeat], after: &'a [HeldSeat]) -> HeldSeatDiff<'a> {
    let old: HashMap<&SeatRef, &HeldSeat> = before.iter().map(|h| (&h.seat, h)).collect();
    let new: HashMap<&SeatRef, &HeldSeat> = after.iter().map(|h| (&h.seat, h)).collect();
    let mut diff = HeldSeatDiff::default();

    for held in before {
        if new.get(&held.seat).map_or(true, |n| n.booking_id != held.booking_id) {
            diff.released.push(held);
        }
    }

    for held in after {
        match old.get(&held.seat) {
            Some(prev) if prev.booking_id == held.booking_id => {
                if prev.status != held.status {
                    diff.restated.push(held);
                }
            }
            _ => diff.added.push(held),
        }
    }

    diff
}

/// Postgres-backed [`ReservationStore`]
#[derive(Clone)]
pub struct PgReservationStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgReservationStore {
    pub fn new(db: &DbClient, lock_timeout: Duration) -> Self {
        Self {
            pool: db.pool.clone(),
            lock_timeout,
        }
    }
}

pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    /// Held seats as last read or written per showtime, diffed on save
    held: HashMap<Uuid, Vec<HeldSeat>>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn showtime_for_update(&mut self, id: Uuid) -> BookingResult<Option<Showtime>> {
        let showtime = load_showtime(&mut self.tx, id, true).await?;
        if let Some(s) = &showtime {
            self.held.insert(s.id, s.held_seats.clone());
        }
        Ok(showtime)
    }

    async fn hall(&mut self, id: Uuid) -> BookingResult<Option<Hall>> {
        let row = sqlx::query_as::<_, HallRow>("SELECT id, name, capacity, seats FROM halls WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| Hall {
            id: r.id,
            name: r.name,
            capacity: r.capacity,
            seats: r.seats.0,
        }))
    }

    async fn wallet_for_update(&mut self, user_id: Uuid) -> BookingResult<Option<Wallet>> {
        load_wallet(&mut self.tx, user_id, true).await
    }

    async fn booking_for_update(&mut self, id: Uuid) -> BookingResult<Option<Booking>> {
        load_booking(&mut self.tx, id, true).await
    }

    async fn insert_booking(&mut self, booking: &Booking) -> BookingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, reference, user_id, showtime_id, seats, total_amount, currency, status,
                                  payment_method, payment_status, paid_at, transaction_ref, qr_token,
                                  expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.reference)
        .bind(booking.user_id)
        .bind(booking.showtime_id)
        .bind(Json(&booking.seats))
        .bind(booking.total_amount)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.payment.method.as_str())
        .bind(booking.payment.status.as_str())
        .bind(booking.payment.paid_at)
        .bind(&booking.payment.transaction_ref)
        .bind(&booking.qr_token)
        .bind(booking.expires_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> BookingResult<()> {
        let result = sqlx::query(
            "UPDATE bookings SET status = $2, payment_status = $3, paid_at = $4, transaction_ref = $5, \
             updated_at = $6 WHERE id = $1",
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.payment.status.as_str())
        .bind(booking.payment.paid_at)
        .bind(&booking.payment.transaction_ref)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(BookingError::BookingNotFound(booking.id));
        }
        Ok(())
    }

    async fn save_showtime(&mut self, showtime: &Showtime) -> BookingResult<()> {
        let result = sqlx::query(
            "UPDATE showtimes SET available_seats = $2, version = version + 1 WHERE id = $1 AND version = $3",
        )
        .bind(showtime.id)
        .bind(showtime.available_seats)
        .bind(showtime.version)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(BookingError::Contention(format!(
                "showtime {} changed since version {}",
                showtime.id, showtime.version
            )));
        }

        let previous = match self.held.remove(&showtime.id) {
            Some(seats) => seats,
            None => load_held_seats(&mut self.tx, showtime.id).await?,
        };
        let diff = diff_held_seats(&previous, &showtime.held_seats);

        for old in &diff.released {
            sqlx::query(
                "DELETE FROM held_seats WHERE showtime_id = $1 AND seat_row = $2 AND seat_number = $3 \
                 AND booking_id = $4",
            )
            .bind(showtime.id)
            .bind(&old.seat.row)
            .bind(old.seat.number)
            .bind(old.booking_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        for held in &diff.restated {
            sqlx::query(
                "UPDATE held_seats SET status = $4 \
                 WHERE showtime_id = $1 AND seat_row = $2 AND seat_number = $3",
            )
            .bind(showtime.id)
            .bind(&held.seat.row)
            .bind(held.seat.number)
            .bind(held.status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        // The primary key rejects a seat some other booking still holds
        for held in &diff.added {
            sqlx::query(
                "INSERT INTO held_seats (showtime_id, seat_row, seat_number, booking_id, status) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(showtime.id)
            .bind(&held.seat.row)
            .bind(held.seat.number)
            .bind(held.booking_id)
            .bind(held.status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        debug!(showtime_id = %showtime.id, held = showtime.held_seats.len(), "Saved showtime inventory");
        self.held.insert(showtime.id, showtime.held_seats.clone());
        Ok(())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> BookingResult<()> {
        let result = sqlx::query("UPDATE wallets SET balance = $2, updated_at = $3 WHERE user_id = $1")
            .bind(wallet.user_id)
            .bind(wallet.balance)
            .bind(wallet.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(BookingError::WalletNotFound(wallet.user_id));
        }
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> BookingResult<()> {
        sqlx::query(
            "INSERT INTO ledger_entries (id, user_id, kind, amount, booking_id, status, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.booking_id)
        .bind(entry.status.as_str())
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> BookingResult<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // SET does not take bind parameters
        let stmt = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&stmt).execute(&mut *tx).await.map_err(map_sqlx_error)?;

        Ok(Box::new(PgStoreTransaction {
            tx,
            held: HashMap::new(),
        }))
    }

    async fn get_booking(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        load_booking(&mut conn, id, false).await
    }

    async fn list_bookings(&self, query: &BookingQuery) -> BookingResult<Page<Booking>> {
        let status = query.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(query.user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let sql = format!(
            "SELECT {} FROM bookings WHERE user_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC, id LIMIT $3 OFFSET $4",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(query.user_id)
            .bind(status)
            .bind(query.page_size as i64)
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let items = rows
            .into_iter()
            .map(Booking::try_from)
            .collect::<BookingResult<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn expired_pending_bookings(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> BookingResult<Vec<Uuid>> {
        sqlx::query_scalar(
            "SELECT id FROM bookings WHERE status = 'pending' AND expires_at < $1 \
             ORDER BY expires_at LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn get_showtime(&self, id: Uuid) -> BookingResult<Option<Showtime>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        load_showtime(&mut conn, id, false).await
    }

    async fn get_wallet(&self, user_id: Uuid) -> BookingResult<Option<Wallet>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        load_wallet(&mut conn, user_id, false).await
    }

    async fn ledger_entries(&self, user_id: Uuid) -> BookingResult<Vec<LedgerEntry>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        load_ledger_entries(&mut conn, user_id).await
    }

    async fn statement(&self, user_id: Uuid) -> BookingResult<Option<(Wallet, Vec<LedgerEntry>)>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        // Both reads see the same snapshot
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let Some(wallet) = load_wallet(&mut tx, user_id, false).await? else {
            return Ok(None);
        };
        let entries = load_ledger_entries(&mut tx, user_id).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(Some((wallet, entries)))
    }
}

#[async_trait]
impl CatalogWriter for PgReservationStore {
    async fn put_hall(&self, hall: &Hall) -> BookingResult<()> {
        sqlx::query(
            "INSERT INTO halls (id, name, capacity, seats) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, capacity = EXCLUDED.capacity, \
             seats = EXCLUDED.seats",
        )
        .bind(hall.id)
        .bind(&hall.name)
        .bind(hall.capacity)
        .bind(Json(&hall.seats))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn put_showtime(&self, showtime: &Showtime) -> BookingResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT INTO showtimes (id, hall_id, starts_at, base_price, capacity, available_seats, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET hall_id = EXCLUDED.hall_id, starts_at = EXCLUDED.starts_at, \
             base_price = EXCLUDED.base_price, capacity = EXCLUDED.capacity, \
             available_seats = EXCLUDED.available_seats, version = showtimes.version + 1",
        )
        .bind(showtime.id)
        .bind(showtime.hall_id)
        .bind(showtime.starts_at)
        .bind(showtime.base_price)
        .bind(showtime.capacity)
        .bind(showtime.available_seats)
        .bind(showtime.version)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM held_seats WHERE showtime_id = $1")
            .bind(showtime.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        for held in &showtime.held_seats {
            sqlx::query(
                "INSERT INTO held_seats (showtime_id, seat_row, seat_number, booking_id, status) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(showtime.id)
            .bind(&held.seat.row)
            .bind(held.seat.number)
            .bind(held.booking_id)
            .bind(held.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn put_wallet(&self, wallet: &Wallet) -> BookingResult<()> {
        if wallet.balance < 0 {
            warn!(user_id = %wallet.user_id, "Refusing to store a negative wallet balance");
            return Err(BookingError::InvalidAmount(wallet.balance));
        }

        sqlx::query(
            "INSERT INTO wallets (user_id, balance, currency, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE SET balance = EXCLUDED.balance, currency = EXCLUDED.currency, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(&wallet.currency)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
