pub mod pricing;
pub mod inventory;

pub use pricing::{SeatPricingResolver, SeatQuote};
pub use inventory::SeatInventory;
