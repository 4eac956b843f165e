//! Conversion helpers for CLI string arguments

use anyhow::{Context, Result};

/// Parse a duration string (e.g., "500ms", "30s", "5m") to milliseconds
///
/// A bare number is taken as seconds.
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("ms") {
        (s.trim_end_matches("ms"), 1u64)
    } else if s.ends_with("min") || s.ends_with('m') {
        (s.trim_end_matches("min").trim_end_matches('m'), 60_000)
    } else if s.ends_with("sec") || s.ends_with('s') {
        (s.trim_end_matches("sec").trim_end_matches('s'), 1_000)
    } else {
        (s.as_str(), 1_000)
    };

    let num: u64 = num_str.parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Duration too large: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_ms() {
        assert_eq!(parse_duration_ms("500ms").unwrap(), 500);
        assert_eq!(parse_duration_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_duration_ms("2sec").unwrap(), 2_000);
        assert_eq!(parse_duration_ms("5m").unwrap(), 300_000);
        assert_eq!(parse_duration_ms("1min").unwrap(), 60_000);
        assert_eq!(parse_duration_ms("7").unwrap(), 7_000);
    }

    #[test]
    fn test_parse_duration_ms_invalid() {
        assert!(parse_duration_ms("soon").is_err());
        assert!(parse_duration_ms("").is_err());
    }

    #[test]
    fn test_parse_duration_ms_overflow() {
        let err = parse_duration_ms("400000000000000m").unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert_eq!(parse_duration_ms("18446744073709551615ms").unwrap(), u64::MAX);
    }
}
