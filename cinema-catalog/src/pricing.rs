use std::collections::HashMap;

use cinema_core::{Amount, BookingSeat, Hall, SeatRef, Showtime};
use serde::{Deserialize, Serialize};

/// Priced seats of one request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatQuote {
    pub seats: Vec<BookingSeat>,
    pub total: Amount,
}

/// Derives seat prices from the hall seat table and the showtime base price.
///
/// A seat found in the hall table costs its own price plus the base price.
/// Without a hall table, or for a seat the table does not list, the base
/// price alone is charged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeatPricingResolver;

impl SeatPricingResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn quote(&self, showtime: &Showtime, seats: &[SeatRef], hall: Option<&Hall>) -> SeatQuote {
        let table: HashMap<(&str, i32), Amount> = hall
            .map(|h| {
                h.seats
                    .iter()
                    .map(|s| ((s.row.as_str(), s.number), s.price))
                    .collect()
            })
            .unwrap_or_default();

        let priced: Vec<BookingSeat> = seats
            .iter()
            .map(|seat| {
                let surcharge = table
                    .get(&(seat.row.as_str(), seat.number))
                    .copied()
                    .unwrap_or(0);

                BookingSeat {
                    row: seat.row.clone(),
                    number: seat.number,
                    price: showtime.base_price + surcharge,
                }
            })
            .collect();

        let total = priced.iter().map(|s| s.price).sum();

        SeatQuote {
            seats: priced,
            total,
        }
    }
}
