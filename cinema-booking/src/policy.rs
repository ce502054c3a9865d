use std::time::Duration;

use crate::retry::RetryPolicy;

/// Business rules applied by the engine
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub max_seats: usize,
    /// How long an unpaid booking keeps its seats
    pub hold_duration: chrono::Duration,
    /// Cancellation is refused once the showtime is closer than this
    pub cancel_window: chrono::Duration,
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
    pub currency: String,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            max_seats: 10,
            hold_duration: chrono::Duration::minutes(15),
            cancel_window: chrono::Duration::hours(2),
            store_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            currency: "KZT".to_string(),
        }
    }
}
