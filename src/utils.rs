//! Utility functions for identifiers and PDF date strings

use bech32::Bech32m;
use chrono::{DateTime, TimeZone, Utc};
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Format a timestamp in the PDF date encoding used inside signature
/// dictionaries, e.g. `D:20250114093201`.
pub fn format_pdf_date(ts: &DateTime<Utc>) -> String {
    format!("D:{}", ts.format("%Y%m%d%H%M%S"))
}

/// Parse the 14-digit body of a PDF date (`YYYYMMDDHHMMSS`) back into a
/// timestamp. Returns `None` for anything malformed.
pub fn parse_pdf_date(digits: &str) -> Option<DateTime<Utc>> {
    if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().ok();

    let year = digits[0..4].parse::<i32>().ok()?;
    let month = field(4..6)?;
    let day = field(6..8)?;
    let hour = field(8..10)?;
    let min = field(10..12)?;
    let sec = field(12..14)?;

    Utc.with_ymd_and_hms(year, month, day, hour, min, sec).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_date_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 14, 9, 32, 1).unwrap();
        let encoded = format_pdf_date(&ts);
        assert_eq!(encoded, "D:20250114093201");

        let parsed = parse_pdf_date(&encoded[2..]).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn pdf_date_rejects_garbage() {
        assert!(parse_pdf_date("not-a-date").is_none());
        assert!(parse_pdf_date("2025011409").is_none());
        assert!(parse_pdf_date("20251399999999").is_none());
    }

    #[test]
    fn generates_unique_bech32_ids() {
        let a = new_uuid_to_bech32("req").unwrap();
        let b = new_uuid_to_bech32("req").unwrap();

        assert!(a.starts_with("req1"));
        assert_ne!(a, b);
    }
}
