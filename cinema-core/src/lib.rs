pub mod clock;
pub mod error;
pub mod models;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BookingError, BookingResult, ErrorKind};
pub use models::*;
pub use repository::{ReservationStore, StoreTransaction};
