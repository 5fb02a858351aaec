use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A broadcast season: one calendar quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Season {
    pub year: i32,
    pub quarter: u32,
}

impl Season {
    pub fn from_date<D: Datelike>(date: &D) -> Self {
        Season {
            year: date.year(),
            quarter: (date.month0() / 3) + 1,
        }
    }

    /// The season three months earlier.
    pub fn previous(&self) -> Self {
        if self.quarter <= 1 {
            Season {
                year: self.year - 1,
                quarter: 4,
            }
        } else {
            Season {
                year: self.year,
                quarter: self.quarter - 1,
            }
        }
    }

    /// Season of a catalog `begin` value in the catalog's timezone.
    /// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates; anything else is `None`.
    pub fn of_begin(begin: &str, offset: &FixedOffset) -> Option<Self> {
        parse_begin(begin, offset).map(|dt| Season::from_date(&dt))
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}q{}", self.year, self.quarter)
    }
}

/// The (current, previous) season pair at `now`.
pub fn recent_seasons(now: DateTime<Utc>, offset: &FixedOffset) -> (Season, Season) {
    let current = Season::from_date(&now.with_timezone(offset));
    (current, current.previous())
}

/// Builds the catalog timezone from an hour offset, falling back to UTC when out of range.
pub fn catalog_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.saturating_mul(3600)).unwrap_or_else(|| Utc.fix())
}

pub(crate) fn parse_begin(begin: &str, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let begin = begin.trim();
    if begin.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(begin) {
        return Some(dt.with_timezone(offset));
    }
    let date = NaiveDate::parse_from_str(begin, "%Y-%m-%d").ok()?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    offset.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_wraps_year() {
        let winter = Season { year: 2025, quarter: 1 };
        assert_eq!(winter.previous(), Season { year: 2024, quarter: 4 });
        assert_eq!(Season { year: 2024, quarter: 3 }.previous().to_string(), "2024q2");
    }

    #[test]
    fn test_begin_bucketed_in_catalog_timezone() {
        let cst = catalog_offset(8);
        // 2024-03-31T20:00Z is already April 1st in UTC+8
        assert_eq!(
            Season::of_begin("2024-03-31T20:00:00.000Z", &cst),
            Some(Season { year: 2024, quarter: 2 })
        );
        assert_eq!(
            Season::of_begin("2024-03-31T20:00:00.000Z", &catalog_offset(0)),
            Some(Season { year: 2024, quarter: 1 })
        );
        assert_eq!(
            Season::of_begin("2023-10-05", &cst),
            Some(Season { year: 2023, quarter: 4 })
        );
        assert_eq!(Season::of_begin("", &cst), None);
        assert_eq!(Season::of_begin("soon", &cst), None);
    }

    #[test]
    fn test_recent_seasons_at_new_year() {
        let now = DateTime::parse_from_rfc3339("2024-12-31T17:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (current, previous) = recent_seasons(now, &catalog_offset(8));
        assert_eq!(current.to_string(), "2025q1");
        assert_eq!(previous.to_string(), "2024q4");
    }
}
