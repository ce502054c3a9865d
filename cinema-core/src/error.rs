use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Amount, SeatRef};

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("A booking must contain between 1 and {max} seats, got {requested}")]
    InvalidSeatCount { requested: usize, max: usize },

    #[error("Seat {0} is listed more than once")]
    DuplicateSeat(SeatRef),

    #[error("Unknown payment method: {0}")]
    UnknownPaymentMethod(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),

    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(Uuid),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Wallet not found for user {0}")]
    WalletNotFound(Uuid),

    #[error("Showtime {0} has already started")]
    ShowtimeStarted(Uuid),

    #[error("Seat {0} is already held")]
    SeatAlreadyHeld(SeatRef),

    #[error("Not enough seats left: requested {requested}, available {available}")]
    CapacityExceeded { requested: usize, available: i32 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("Booking {0} is already confirmed")]
    AlreadyConfirmed(Uuid),

    #[error("Booking {0} is already cancelled")]
    AlreadyCancelled(Uuid),

    #[error("Booking {0} has expired")]
    Expired(Uuid),

    #[error("Cancellation closed: showtime starts at {starts_at}")]
    CancelWindowClosed { starts_at: DateTime<Utc> },

    /// A concurrent writer got there first; safe to retry the whole unit
    #[error("Concurrent modification: {0}")]
    Contention(String),

    #[error("Store operation timed out: {0}")]
    StoreTimeout(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        use BookingError::*;

        match self {
            InvalidSeatCount { .. } | DuplicateSeat(_) | UnknownPaymentMethod(_) | InvalidAmount(_) => {
                ErrorKind::Validation
            }
            ShowtimeNotFound(_) | BookingNotFound(_) | WalletNotFound(_) => ErrorKind::NotFound,
            ShowtimeStarted(_)
            | SeatAlreadyHeld(_)
            | CapacityExceeded { .. }
            | InsufficientBalance { .. }
            | AlreadyConfirmed(_)
            | AlreadyCancelled(_)
            | Expired(_)
            | CancelWindowClosed { .. }
            | Contention(_) => ErrorKind::Conflict,
            StoreTimeout(_) | StoreUnavailable(_) | Store(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether the caller may repeat the request unchanged.
    ///
    /// `Store` is excluded: it also carries permanent failures such as rows
    /// that no longer decode or writes a constraint rejects.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::Contention(_) | BookingError::StoreTimeout(_) | BookingError::StoreUnavailable(_)
        )
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
