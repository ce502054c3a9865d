use std::collections::HashSet;

use cinema_core::{BookingError, BookingResult, HeldSeat, HeldSeatStatus, SeatRef, Showtime};
use uuid::Uuid;

/// Held-seat bookkeeping for a showtime.
///
/// These operations only touch the in-memory record loaded inside a store
/// transaction; persisting it is the caller's job.
pub trait SeatInventory {
    /// Fail on the first requested seat that is already held, or when the
    /// request does not fit into the remaining capacity.
    fn ensure_available(&self, seats: &[SeatRef]) -> BookingResult<()>;

    /// Add `seats` to the held set on behalf of `booking_id`
    fn hold(&mut self, booking_id: Uuid, seats: &[SeatRef], status: HeldSeatStatus) -> BookingResult<()>;

    /// Remove the seats held by `booking_id` among `seats`. Returns how many
    /// were released.
    fn release(&mut self, booking_id: Uuid, seats: &[SeatRef]) -> usize;

    /// Flip every seat of `booking_id` to booked. Returns how many changed.
    fn mark_booked(&mut self, booking_id: Uuid) -> usize;

    fn held_count(&self) -> usize;
}

impl SeatInventory for Showtime {
    fn ensure_available(&self, seats: &[SeatRef]) -> BookingResult<()> {
        let held: HashSet<&SeatRef> = self.held_seats.iter().map(|h| &h.seat).collect();

        if let Some(taken) = seats.iter().find(|s| held.contains(s)) {
            return Err(BookingError::SeatAlreadyHeld(taken.clone()));
        }

        let free_by_capacity = (self.capacity as usize).saturating_sub(self.held_seats.len());
        if seats.len() > free_by_capacity || (self.available_seats as i64) < seats.len() as i64 {
            return Err(BookingError::CapacityExceeded {
                requested: seats.len(),
                available: self.available_seats.min(free_by_capacity as i32),
            });
        }

        Ok(())
    }

    fn hold(&mut self, booking_id: Uuid, seats: &[SeatRef], status: HeldSeatStatus) -> BookingResult<()> {
        let mut unique = HashSet::with_capacity(seats.len());
        if let Some(dup) = seats.iter().find(|s| !unique.insert(*s)) {
            return Err(BookingError::DuplicateSeat(dup.clone()));
        }

        self.ensure_available(seats)?;

        self.held_seats.extend(seats.iter().map(|seat| HeldSeat {
            seat: seat.clone(),
            booking_id,
            status,
        }));
        self.available_seats -= seats.len() as i32;

        Ok(())
    }

    fn release(&mut self, booking_id: Uuid, seats: &[SeatRef]) -> usize {
        let wanted: HashSet<&SeatRef> = seats.iter().collect();
        let before = self.held_seats.len();

        self.held_seats
            .retain(|h| !(h.booking_id == booking_id && wanted.contains(&h.seat)));

        let released = before - self.held_seats.len();
        self.available_seats += released as i32;
        released
    }

    fn mark_booked(&mut self, booking_id: Uuid) -> usize {
        let mut changed = 0;
        for held in self
            .held_seats
            .iter_mut()
            .filter(|h| h.booking_id == booking_id && h.status != HeldSeatStatus::Booked)
        {
            held.status = HeldSeatStatus::Booked;
            changed += 1;
        }
        changed
    }

    fn held_count(&self) -> usize {
        self.held_seats.len()
    }
}
