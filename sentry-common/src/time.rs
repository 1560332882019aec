//! UTC time-string parsing, as used for historical source `starttime`/`endtime`.
use crate::error::ConfigError;
use chrono::NaiveDateTime;

const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d"];

/// Parses a `'YYYY-mm-dd [HH:MM[:SS]]'` string (always UTC) into a unix
/// timestamp, trying each format in turn.
pub fn parse_utc_timestamp(location: &str, s: &str) -> Result<i64, ConfigError> {
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp());
        }
        if *fmt == "%Y-%m-%d"
            && let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt)
        {
            return Ok(date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp());
        }
    }
    Err(ConfigError::new(
        location,
        format!("invalid date '{s}'; expected 'YYYY-mm-dd [HH:MM[:SS]]'"),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_date_only() {
        assert_eq!(
            parse_utc_timestamp("t", "2019-01-01").unwrap(),
            1546300800
        );
    }

    #[test]
    fn parses_date_and_time() {
        assert_eq!(
            parse_utc_timestamp("t", "2019-01-01 06:00:00").unwrap(),
            1546322400
        );
    }

    #[test]
    fn parses_date_and_hm() {
        assert_eq!(
            parse_utc_timestamp("t", "2019-01-01 06:00").unwrap(),
            1546322400
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_utc_timestamp("t", "not a date").is_err());
    }
}
