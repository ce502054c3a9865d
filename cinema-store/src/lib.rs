pub mod app_config;
pub mod catalog;
pub mod database;
pub mod memory;
pub mod postgres;

pub use app_config::{Config, StorageBackend};
pub use catalog::CatalogWriter;
pub use database::DbClient;
pub use memory::MemoryStore;
pub use postgres::PgReservationStore;
