pub mod coordinator;
pub mod engine;
pub mod expiry;
pub mod identifiers;
pub mod ledger;
pub mod lifecycle;
pub mod policy;
pub mod retry;

pub use coordinator::{CreateBookingRequest, ReservationCoordinator};
pub use engine::BookingEngine;
pub use expiry::{ExpiryReconciler, SweepReport};
pub use lifecycle::{CancellationReceipt, LifecycleManager};
pub use policy::BookingPolicy;
pub use retry::RetryPolicy;
