use chrono::{DateTime, Utc};
use rand::Rng;

/// Customer-facing reference, e.g. `BK-20260201-004217`
pub fn booking_reference(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("BK-{}-{:06}", now.format("%Y%m%d"), suffix)
}

pub fn qr_token(reference: &str) -> String {
    format!("QR-{}", reference)
}

pub fn transaction_ref(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("TXN-{}-{:08X}", now.format("%Y%m%d%H%M%S"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_identifier_formats() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 9, 30, 5).unwrap();

        let reference = booking_reference(now);
        assert!(reference.starts_with("BK-20260201-"));
        assert_eq!(reference.len(), "BK-20260201-000000".len());
        assert!(reference[12..].chars().all(|c| c.is_ascii_digit()));

        assert_eq!(qr_token(&reference), format!("QR-{}", reference));

        let txn = transaction_ref(now);
        assert!(txn.starts_with("TXN-20260201093005-"));
        assert_eq!(txn.len(), "TXN-20260201093005-".len() + 8);
    }
}
