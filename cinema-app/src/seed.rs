use chrono::{Duration, Utc};
use cinema_booking::{BookingEngine, CreateBookingRequest};
use cinema_core::{Amount, BookingResult, Hall, HallSeat, SeatKind, SeatRef, Showtime, Wallet};
use cinema_store::CatalogWriter;
use tracing::{info, warn};
use uuid::Uuid;

const ROW_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SESSION_HOURS: [u32; 3] = [10, 13, 16];
const SESSION_PRICES: [Amount; 3] = [2000, 2500, 3500];

/// Ids produced by earlier seed steps, consumed by later ones
#[derive(Debug, Default)]
pub struct SeedContext {
    pub users: Vec<Uuid>,
    pub halls: Vec<Hall>,
    pub showtimes: Vec<Showtime>,
    pub bookings: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HallType {
    Standard,
    Vip,
}

/// Seat table for a rectangular hall.
///
/// VIP halls price every seat as VIP. Other halls get a VIP block in the
/// middle and couple seats on the odd positions of the last two rows.
pub fn hall_layout(name: &str, rows: usize, per_row: i32, hall_type: HallType) -> Hall {
    let base: Amount = match hall_type {
        HallType::Standard => 2000,
        HallType::Vip => 4000,
    };
    let rows = rows.min(ROW_LETTERS.len());

    let mut seats = Vec::with_capacity(rows * per_row as usize);
    for r in 0..rows {
        let row = (ROW_LETTERS[r] as char).to_string();
        for number in 1..=per_row {
            let central = r >= rows / 3
                && r <= 2 * rows / 3
                && number >= per_row / 4
                && number <= 3 * per_row / 4;

            let (kind, price) = if r + 2 >= rows && number % 2 == 1 && number < per_row {
                (SeatKind::Couple, base * 13 / 10)
            } else if hall_type == HallType::Vip || central {
                (SeatKind::Vip, base * 3 / 2)
            } else {
                (SeatKind::Regular, base)
            };

            seats.push(HallSeat {
                row: row.clone(),
                number,
                kind,
                price,
            });
        }
    }

    Hall {
        id: Uuid::new_v4(),
        name: name.to_string(),
        capacity: seats.len() as i32,
        seats,
    }
}

async fn seed_users(ctx: &mut SeedContext, engine: &BookingEngine, catalog: &dyn CatalogWriter) -> BookingResult<()> {
    let currency = engine.policy().currency.clone();

    for opening in [50_000, 20_000, 5_000] {
        let user_id = Uuid::new_v4();
        catalog.put_wallet(&Wallet::empty(user_id, currency.as_str(), Utc::now())).await?;
        engine.top_up(user_id, opening).await?;
        ctx.users.push(user_id);
    }

    info!(count = ctx.users.len(), "Seeded users with wallets");
    Ok(())
}

async fn seed_halls(ctx: &mut SeedContext, catalog: &dyn CatalogWriter) -> BookingResult<()> {
    for hall in [
        hall_layout("Hall 1", 8, 12, HallType::Standard),
        hall_layout("VIP Hall", 5, 10, HallType::Vip),
    ] {
        catalog.put_hall(&hall).await?;
        ctx.halls.push(hall);
    }

    info!(count = ctx.halls.len(), "Seeded halls");
    Ok(())
}

async fn seed_showtimes(ctx: &mut SeedContext, catalog: &dyn CatalogWriter, days: i64) -> BookingResult<()> {
    let now = Utc::now();

    for day in 0..days {
        let date = (now + Duration::days(day)).date_naive();

        for (slot, hour) in SESSION_HOURS.iter().enumerate() {
            let Some(starts_at) = date.and_hms_opt(*hour, 0, 0).map(|t| t.and_utc()) else {
                continue;
            };
            if starts_at <= now {
                continue;
            }

            let hall = &ctx.halls[(day as usize + slot) % ctx.halls.len()];
            let showtime = Showtime::new(hall.id, starts_at, SESSION_PRICES[slot], hall.capacity);
            catalog.put_showtime(&showtime).await?;
            ctx.showtimes.push(showtime);
        }
    }

    info!(count = ctx.showtimes.len(), "Seeded showtimes");
    Ok(())
}

async fn seed_bookings(ctx: &mut SeedContext, engine: &BookingEngine) -> BookingResult<()> {
    // Demo seats only exist in the large hall
    let main_hall = ctx.halls.first().map(|h| h.id);
    let sessions: Vec<Uuid> = ctx
        .showtimes
        .iter()
        .filter(|s| Some(s.hall_id) == main_hall)
        .map(|s| s.id)
        .take(2)
        .collect();

    if ctx.users.len() < 2 || sessions.len() < 2 {
        warn!("Not enough data to create bookings");
        return Ok(());
    }

    let requests = [
        CreateBookingRequest {
            user_id: ctx.users[0],
            showtime_id: sessions[0],
            seats: vec![SeatRef::new("E", 10), SeatRef::new("E", 11)],
            payment_method: "wallet".to_string(),
        },
        CreateBookingRequest {
            user_id: ctx.users[1],
            showtime_id: sessions[1],
            seats: vec![SeatRef::new("D", 5), SeatRef::new("D", 6), SeatRef::new("D", 7)],
            payment_method: "card".to_string(),
        },
    ];

    for request in requests {
        match engine.create_booking(request).await {
            Ok(booking) => ctx.bookings.push(booking.id),
            Err(e) => warn!(error = %e, "Skipping demo booking"),
        }
    }

    info!(count = ctx.bookings.len(), "Seeded bookings");
    Ok(())
}

/// Populate an empty store with demo users, halls, showtimes and bookings
pub async fn run(engine: &BookingEngine, catalog: &dyn CatalogWriter) -> BookingResult<SeedContext> {
    let mut ctx = SeedContext::default();

    seed_users(&mut ctx, engine, catalog).await?;
    seed_halls(&mut ctx, catalog).await?;
    seed_showtimes(&mut ctx, catalog, 3).await?;
    seed_bookings(&mut ctx, engine).await?;

    Ok(ctx)
}
