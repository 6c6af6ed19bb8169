//! Date checks against the lease clock
//!
//! Dates come from feature values (for example a maintenance end date) and
//! are checked against the local clock, which the client verifies against the
//! server time received with each grant.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// Layout accepted in addition to RFC 3339, interpreted as UTC
const PLAIN_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// What to check a date for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateCheck {
    /// The date lies in the future
    HasNotExpired,
}

impl DateCheck {
    /// Flag value for [`DateCheck::HasNotExpired`]
    pub const HAS_NOT_EXPIRED: u32 = 0x01;

    /// Parse a date check flag
    pub fn from_flags(flags: u32) -> Result<Self> {
        match flags {
            Self::HAS_NOT_EXPIRED => Ok(DateCheck::HasNotExpired),
            other => Err(Error::invalid_flags(format!(
                "unknown date check flags {:#x}",
                other
            ))),
        }
    }

    /// Apply the check to `date` at time `now`
    pub fn holds(self, date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            DateCheck::HasNotExpired => date > now,
        }
    }
}

/// Parse a date in RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(input, PLAIN_LAYOUT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_both_layouts() {
        let expected = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_date("2030-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_date("2030-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_date("2030-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_date("next tuesday"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_flags() {
        assert_eq!(DateCheck::from_flags(1).unwrap(), DateCheck::HasNotExpired);
        assert!(matches!(DateCheck::from_flags(0), Err(Error::InvalidFlags(_))));
        assert!(matches!(DateCheck::from_flags(4), Err(Error::InvalidFlags(_))));
    }

    #[test]
    fn test_has_not_expired() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();
        assert!(DateCheck::HasNotExpired.holds(later, now));
        assert!(!DateCheck::HasNotExpired.holds(now, later));
        assert!(!DateCheck::HasNotExpired.holds(now, now));
    }
}
