use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BookingError;

/// Money in whole units of the configured currency.
pub type Amount = i64;

/// A seat position inside a hall, e.g. row "E", number 10.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatRef {
    pub row: String,
    pub number: i32,
}

impl SeatRef {
    pub fn new(row: impl Into<String>, number: i32) -> Self {
        Self {
            row: row.into(),
            number,
        }
    }
}

impl fmt::Display for SeatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.number)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeldSeatStatus {
    /// Held by a booking that has not been paid yet
    Reserved,
    /// Held by a confirmed booking
    Booked,
}

impl HeldSeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeldSeatStatus::Reserved => "reserved",
            HeldSeatStatus::Booked => "booked",
        }
    }
}

impl FromStr for HeldSeatStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(HeldSeatStatus::Reserved),
            "booked" => Ok(HeldSeatStatus::Booked),
            other => Err(BookingError::Store(format!("unknown held seat status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldSeat {
    pub seat: SeatRef,
    pub booking_id: Uuid,
    pub status: HeldSeatStatus,
}

/// Seat inventory of one screening.
///
/// `held_seats` is the single source of truth for occupancy. Each seat appears
/// in it at most once and its length never exceeds `capacity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Showtime {
    pub id: Uuid,
    pub hall_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub base_price: Amount,
    pub capacity: i32,
    pub available_seats: i32,
    pub held_seats: Vec<HeldSeat>,
    /// Bumped by the store on every committed inventory write
    pub version: i64,
}

impl Showtime {
    pub fn new(hall_id: Uuid, starts_at: DateTime<Utc>, base_price: Amount, capacity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            hall_id,
            starts_at,
            base_price,
            capacity,
            available_seats: capacity,
            held_seats: Vec::new(),
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeatKind {
    Regular,
    Vip,
    Couple,
}

impl SeatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatKind::Regular => "regular",
            SeatKind::Vip => "vip",
            SeatKind::Couple => "couple",
        }
    }
}

impl FromStr for SeatKind {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(SeatKind::Regular),
            "vip" => Ok(SeatKind::Vip),
            "couple" => Ok(SeatKind::Couple),
            other => Err(BookingError::Store(format!("unknown seat kind: {}", other))),
        }
    }
}

/// Seat metadata published by the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallSeat {
    pub row: String,
    pub number: i32,
    pub kind: SeatKind,
    pub price: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hall {
    pub id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub seats: Vec<HallSeat>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    /// Pending and confirmed bookings occupy seats
    pub fn holds_seats(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "expired" => Ok(BookingStatus::Expired),
            other => Err(BookingError::Store(format!("unknown booking status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Paid from the user's wallet at booking time
    Balance,
    Card,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Balance => "balance",
            PaymentMethod::Card => "card",
            PaymentMethod::Cash => "cash",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance" | "wallet" => Ok(PaymentMethod::Balance),
            "card" | "external-card" => Ok(PaymentMethod::Card),
            "cash" => Ok(PaymentMethod::Cash),
            other => Err(BookingError::UnknownPaymentMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(BookingError::Store(format!("unknown payment status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_ref: Option<String>,
}

impl Payment {
    pub fn pending(method: PaymentMethod) -> Self {
        Self {
            method,
            status: PaymentStatus::Pending,
            paid_at: None,
            transaction_ref: None,
        }
    }
}

/// A seat inside a booking together with the price it was sold at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingSeat {
    pub row: String,
    pub number: i32,
    pub price: Amount,
}

impl BookingSeat {
    pub fn seat_ref(&self) -> SeatRef {
        SeatRef::new(self.row.clone(), self.number)
    }
}

/// A reservation attempt. Never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    /// Human readable reference shown to the customer, e.g. BK-20260201-001234
    pub reference: String,
    pub user_id: Uuid,
    pub showtime_id: Uuid,
    pub seats: Vec<BookingSeat>,
    pub total_amount: Amount,
    pub currency: String,
    pub status: BookingStatus,
    pub payment: Payment,
    pub qr_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn seat_refs(&self) -> Vec<SeatRef> {
        self.seats.iter().map(BookingSeat::seat_ref).collect()
    }

    /// Confirmed and actually paid, i.e. eligible for a refund on cancellation
    pub fn is_paid(&self) -> bool {
        self.status == BookingStatus::Confirmed && self.payment.status == PaymentStatus::Completed
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Transition to confirmed with a completed payment
    pub fn mark_paid(&mut self, now: DateTime<Utc>, transaction_ref: String) {
        self.status = BookingStatus::Confirmed;
        self.payment.status = PaymentStatus::Completed;
        self.payment.paid_at = Some(now);
        self.payment.transaction_ref = Some(transaction_ref);
        self.updated_at = now;
    }

    pub fn update_status(&mut self, status: BookingStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Amount,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn empty(user_id: Uuid, currency: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: 0,
            currency: currency.into(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerKind {
    BookingDebit,
    Refund,
    TopUp,
    /// Audit record of a card or cash payment; the wallet is not touched
    ExternalPayment,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::BookingDebit => "booking-debit",
            LedgerKind::Refund => "refund",
            LedgerKind::TopUp => "top-up",
            LedgerKind::ExternalPayment => "external-payment",
        }
    }

    pub fn affects_wallet(&self) -> bool {
        !matches!(self, LedgerKind::ExternalPayment)
    }
}

impl FromStr for LedgerKind {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking-debit" => Ok(LedgerKind::BookingDebit),
            "refund" => Ok(LedgerKind::Refund),
            "top-up" => Ok(LedgerKind::TopUp),
            "external-payment" => Ok(LedgerKind::ExternalPayment),
            other => Err(BookingError::Store(format!("unknown ledger kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "completed" => Ok(EntryStatus::Completed),
            "failed" => Ok(EntryStatus::Failed),
            other => Err(BookingError::Store(format!("unknown ledger entry status: {}", other))),
        }
    }
}

/// Immutable audit record of a balance change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: LedgerKind,
    /// Signed: debits are negative, credits positive
    pub amount: Amount,
    pub booking_id: Option<Uuid>,
    pub status: EntryStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Filter and paging for a user's booking history
#[derive(Debug, Clone)]
pub struct BookingQuery {
    pub user_id: Uuid,
    pub status: Option<BookingStatus>,
    pub page: u32,
    pub page_size: u32,
}

impl BookingQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;
    pub const MAX_PAGE_SIZE: u32 = 50;

    pub fn new(user_id: Uuid, status: Option<BookingStatus>, page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = if page_size < 1 || page_size > Self::MAX_PAGE_SIZE {
            Self::DEFAULT_PAGE_SIZE
        } else {
            page_size
        };

        Self {
            user_id,
            status,
            page,
            page_size,
        }
    }

    /// Rows to skip; computed in u64 so no page number can overflow it
    pub fn offset(&self) -> u64 {
        (u64::from(self.page) - 1) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
