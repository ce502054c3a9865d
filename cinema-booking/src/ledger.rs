use chrono::{DateTime, Utc};
use cinema_core::{
    Amount, Booking, BookingError, BookingResult, EntryStatus, LedgerEntry, LedgerKind, Wallet,
};
use uuid::Uuid;

/// Largest single wallet top-up
pub const MAX_TOP_UP: Amount = 1_000_000;

fn entry(
    user_id: Uuid,
    kind: LedgerKind,
    amount: Amount,
    booking_id: Option<Uuid>,
    description: String,
    now: DateTime<Utc>,
) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        user_id,
        kind,
        amount,
        booking_id,
        status: EntryStatus::Completed,
        description,
        created_at: now,
    }
}

/// Take the booking total out of the wallet
pub fn debit_for_booking(
    wallet: &mut Wallet,
    booking: &Booking,
    now: DateTime<Utc>,
) -> BookingResult<LedgerEntry> {
    let remaining = wallet
        .balance
        .checked_sub(booking.total_amount)
        .filter(|b| *b >= 0)
        .ok_or(BookingError::InsufficientBalance {
            required: booking.total_amount,
            available: wallet.balance,
        })?;

    wallet.balance = remaining;
    wallet.updated_at = now;

    Ok(entry(
        wallet.user_id,
        LedgerKind::BookingDebit,
        -booking.total_amount,
        Some(booking.id),
        format!("Payment for booking {}", booking.reference),
        now,
    ))
}

/// Give the booking total back to the wallet
pub fn refund(wallet: &mut Wallet, booking: &Booking, now: DateTime<Utc>) -> LedgerEntry {
    wallet.balance = wallet.balance.saturating_add(booking.total_amount);
    wallet.updated_at = now;

    entry(
        wallet.user_id,
        LedgerKind::Refund,
        booking.total_amount,
        Some(booking.id),
        format!("Refund for booking {}", booking.reference),
        now,
    )
}

/// Audit record of a payment settled outside the wallet
pub fn external_payment(booking: &Booking, now: DateTime<Utc>) -> LedgerEntry {
    entry(
        booking.user_id,
        LedgerKind::ExternalPayment,
        -booking.total_amount,
        Some(booking.id),
        format!(
            "{} payment for booking {}",
            booking.payment.method.as_str(),
            booking.reference
        ),
        now,
    )
}

pub fn top_up(wallet: &mut Wallet, amount: Amount, now: DateTime<Utc>) -> BookingResult<LedgerEntry> {
    if amount <= 0 || amount > MAX_TOP_UP {
        return Err(BookingError::InvalidAmount(amount));
    }

    wallet.balance = wallet
        .balance
        .checked_add(amount)
        .ok_or(BookingError::InvalidAmount(amount))?;
    wallet.updated_at = now;

    Ok(entry(
        wallet.user_id,
        LedgerKind::TopUp,
        amount,
        None,
        "Wallet top-up".to_string(),
        now,
    ))
}

/// Net wallet movement recorded by `entries`
pub fn wallet_delta(entries: &[LedgerEntry]) -> Amount {
    entries
        .iter()
        .filter(|e| e.kind.affects_wallet() && e.status == EntryStatus::Completed)
        .map(|e| e.amount)
        .sum()
}
