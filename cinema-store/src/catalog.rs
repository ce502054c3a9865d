use async_trait::async_trait;
use cinema_core::{BookingResult, Hall, Showtime, Wallet};

/// Write side of the catalog and identity collaborators.
///
/// Halls, showtimes and wallets are created outside the booking flow; this
/// is how seeding and tests put them in place. Existing records are replaced.
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    async fn put_hall(&self, hall: &Hall) -> BookingResult<()>;

    async fn put_showtime(&self, showtime: &Showtime) -> BookingResult<()>;

    async fn put_wallet(&self, wallet: &Wallet) -> BookingResult<()>;
}
