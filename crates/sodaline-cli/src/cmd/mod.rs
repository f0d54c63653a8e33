pub mod fetch;
pub mod status;

use chrono::NaiveDate;

/// Parse a run date as `MMDDYYYY` or `YYYY-MM-DD` into the `MMDDYYYY` key
/// used in file names.
fn parse_date_key(s: &str) -> Result<String, String> {
    NaiveDate::parse_from_str(s, "%m%d%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .map(|d| d.format("%m%d%Y").to_string())
        .map_err(|e| format!("Invalid date (expected MMDDYYYY or YYYY-MM-DD): {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_key_forms() {
        assert_eq!(parse_date_key("03142025").unwrap(), "03142025");
        assert_eq!(parse_date_key("2025-03-14").unwrap(), "03142025");
        assert!(parse_date_key("14032025").is_err());
        assert!(parse_date_key("yesterday").is_err());
    }
}
