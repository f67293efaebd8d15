//! Common validation utilities.

use chrono::NaiveTime;
use validator::ValidationError;

/// Wire format for lesson times of day.
pub const TIME_OF_DAY_FORMAT: &str = "%H:%M";

/// Upper bound for a single lesson price in cents (10 000 EUR).
const MAX_PRICE_CENTS: i64 = 1_000_000;

/// Upper bound for participants on a single lesson instance.
pub const MAX_LESSON_CAPACITY: i32 = 50;

/// Parses an "HH:MM" time of day.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(value, TIME_OF_DAY_FORMAT).map_err(|_| {
        let mut err = ValidationError::new("time_of_day_format");
        err.message = Some("Time must use the HH:MM format".into());
        err
    })
}

/// Validates that a string is an "HH:MM" time of day.
pub fn validate_time_of_day(value: &str) -> Result<(), ValidationError> {
    parse_time_of_day(value).map(|_| ())
}

/// Validates that a price in cents is positive and below the platform limit.
pub fn validate_price_cents(price_cents: i64) -> Result<(), ValidationError> {
    if (0..=MAX_PRICE_CENTS).contains(&price_cents) {
        Ok(())
    } else {
        let mut err = ValidationError::new("price_range");
        err.message = Some("Price must be between 0 and 1000000 cents".into());
        Err(err)
    }
}

/// Validates a lesson capacity (maximum participants).
pub fn validate_capacity(capacity: i32) -> Result<(), ValidationError> {
    if (1..=MAX_LESSON_CAPACITY).contains(&capacity) {
        Ok(())
    } else {
        let mut err = ValidationError::new("capacity_range");
        err.message = Some("Capacity must be between 1 and 50".into());
        Err(err)
    }
}

/// Validates a participant count on a booking request.
pub fn validate_participants(count: i32) -> Result<(), ValidationError> {
    if count >= 1 {
        Ok(())
    } else {
        let mut err = ValidationError::new("participants_range");
        err.message = Some("At least one participant is required".into());
        Err(err)
    }
}

/// Validates a client origin URL used to build payment redirect links.
pub fn validate_origin_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("origin_url_scheme");
        err.message = Some("Origin URL must use http or https".into());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_time_of_day() {
        let t = parse_time_of_day("09:30").unwrap();
        assert_eq!(t.hour(), 9);
        assert_eq!(t.minute(), 30);
    }

    #[test]
    fn test_parse_time_of_day_rejects_garbage() {
        assert!(parse_time_of_day("9h30").is_err());
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("").is_err());
    }

    #[test]
    fn test_parse_time_of_day_error_message() {
        let err = parse_time_of_day("noon").unwrap_err();
        assert_eq!(
            err.message.unwrap().to_string(),
            "Time must use the HH:MM format"
        );
    }

    #[test]
    fn test_validate_price_cents() {
        assert!(validate_price_cents(0).is_ok());
        assert!(validate_price_cents(5_000).is_ok());
        assert!(validate_price_cents(MAX_PRICE_CENTS).is_ok());
        assert!(validate_price_cents(-1).is_err());
        assert!(validate_price_cents(MAX_PRICE_CENTS + 1).is_err());
    }

    #[test]
    fn test_validate_capacity() {
        assert!(validate_capacity(1).is_ok());
        assert!(validate_capacity(MAX_LESSON_CAPACITY).is_ok());
        assert!(validate_capacity(0).is_err());
        assert!(validate_capacity(MAX_LESSON_CAPACITY + 1).is_err());
    }

    #[test]
    fn test_validate_participants() {
        assert!(validate_participants(1).is_ok());
        assert!(validate_participants(4).is_ok());
        assert!(validate_participants(0).is_err());
        assert!(validate_participants(-2).is_err());
    }

    #[test]
    fn test_validate_origin_url() {
        assert!(validate_origin_url("https://skimonitor.app").is_ok());
        assert!(validate_origin_url("http://localhost:3000").is_ok());
        assert!(validate_origin_url("ftp://example.com").is_err());
        assert!(validate_origin_url("skimonitor.app").is_err());
    }
}
