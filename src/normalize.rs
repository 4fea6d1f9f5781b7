//! Locale normalization for amounts and dates.
//!
//! Extracted invoices mix German formats (decimal comma, `DD.MM.YYYY`)
//! with English ones. Both functions are total: bad input falls back to
//! `0.0` / `None` with a warning, never an error.

use chrono::NaiveDate;
use tracing::warn;

/// Strings the extractor emits when a field could not be found. They are
/// preserved verbatim in records but treated as "absent" by duplicate
/// detection and normalization.
pub const SENTINELS: [&str; 4] = ["", "Unknown", "Not found", "Nicht gefunden"];

pub fn is_sentinel(value: &str) -> bool {
    SENTINELS.contains(&value.trim())
}

/// Convert a locale amount string (`"1.234,56 EUR"`, `"$1,234.56"`, ...)
/// to a float.
///
/// After stripping currency symbols, whitespace and any other non-numeric
/// characters, the separator that occurs last is taken as the decimal
/// separator and the other one is dropped as a thousands separator.
pub fn normalize_amount(raw: &str) -> f64 {
    let raw = raw.trim();
    if raw.is_empty() || raw == "Nicht gefunden" {
        return 0.0;
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let candidate = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        // German format: 1.234,56
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        // English format: 1,234.56
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        // Single comma as decimal separator: 1234,56
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    match candidate.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            warn!(amount = %raw, "could not parse amount, falling back to 0.0");
            0.0
        }
    }
}

/// Date formats tried after the two strict ones, mirroring what shows up
/// on real invoices.
const FALLBACK_DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%y", "%Y/%m/%d"];

/// Normalize a date string to ISO `YYYY-MM-DD`.
///
/// Returns `None` for empty input and the "Nicht gefunden" sentinel, and
/// for anything no known format matches.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "Nicht gefunden" {
        return None;
    }

    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d.%m.%Y"))
        .or_else(|_| {
            FALLBACK_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .ok_or(())
        });

    match parsed {
        Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
        Err(_) => {
            warn!(date = %raw, "could not parse date");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_german_thousands() {
        assert_eq!(normalize_amount("1.234,56"), 1234.56);
        assert_eq!(normalize_amount("1.234,56 EUR"), 1234.56);
    }

    #[test]
    fn amount_decimal_comma() {
        assert_eq!(normalize_amount("1234,56"), 1234.56);
        assert_eq!(normalize_amount("100,00 EUR"), 100.00);
    }

    #[test]
    fn amount_english_formats() {
        assert_eq!(normalize_amount("1,234.56"), 1234.56);
        assert_eq!(normalize_amount("1234.56"), 1234.56);
    }

    #[test]
    fn amount_currency_symbols() {
        assert_eq!(normalize_amount("€ 99,90"), 99.90);
        assert_eq!(normalize_amount("$42.00"), 42.0);
        assert_eq!(normalize_amount("£ 7"), 7.0);
    }

    #[test]
    fn amount_sentinel_and_garbage() {
        assert_eq!(normalize_amount("Nicht gefunden"), 0.0);
        assert_eq!(normalize_amount(""), 0.0);
        assert_eq!(normalize_amount("n/a"), 0.0);
        assert_eq!(normalize_amount("1.2.3,4,5"), 0.0);
    }

    #[test]
    fn date_formats() {
        assert_eq!(normalize_date("31.12.2023").as_deref(), Some("2023-12-31"));
        assert_eq!(normalize_date("2023-12-31").as_deref(), Some("2023-12-31"));
        assert_eq!(normalize_date("31/12/2023").as_deref(), Some("2023-12-31"));
        assert_eq!(normalize_date("31.12.23").as_deref(), Some("2023-12-31"));
    }

    #[test]
    fn date_empty_and_sentinel() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("Nicht gefunden"), None);
        assert_eq!(normalize_date("soon"), None);
    }

    #[test]
    fn sentinel_detection() {
        assert!(is_sentinel(""));
        assert!(is_sentinel("Unknown"));
        assert!(is_sentinel("Nicht gefunden"));
        assert!(!is_sentinel("RE-2023-001"));
    }
}
