use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::Business;

/// Source of "now", injected so flows are testable against a fixed instant.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A misconfigured timezone degrades to UTC instead of failing the turn.
pub fn business_tz(business: &Business) -> Tz {
    business.timezone.parse().unwrap_or_else(|_| {
        tracing::warn!(
            business = %business.id,
            timezone = %business.timezone,
            "unparseable business timezone, falling back to UTC"
        );
        Tz::UTC
    })
}

/// Local wall-clock day/time to a UTC instant. `None` when the local time
/// does not exist (spring-forward gap); ambiguous times resolve to the
/// earlier instant.
pub fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<NaiveDateTime> {
    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => Some(dt.naive_utc()),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.naive_utc()),
        LocalResult::None => None,
    }
}

pub fn utc_to_local(tz: Tz, at: &NaiveDateTime) -> NaiveDateTime {
    Utc.from_utc_datetime(at).with_timezone(&tz).naive_local()
}

pub fn today_in(tz: Tz, clock: &dyn Clock) -> NaiveDate {
    clock.now_utc().with_timezone(&tz).date_naive()
}

/// Fixed weekday convention shared with the stored schedule: 0 = Monday
/// through 6 = Sunday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn berlin() -> Tz {
        "Europe/Berlin".parse().unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn test_local_to_utc_summer() {
        // CEST is UTC+2
        let utc = local_to_utc(berlin(), d("2025-06-16"), t("09:00")).unwrap();
        assert_eq!(utc.hour(), 7);
        assert_eq!(utc.day(), 16);
    }

    #[test]
    fn test_local_to_utc_winter() {
        // CET is UTC+1
        let utc = local_to_utc(berlin(), d("2025-01-13"), t("09:00")).unwrap();
        assert_eq!(utc.hour(), 8);
    }

    #[test]
    fn test_spring_forward_gap_is_none() {
        // 2025-03-30 02:30 does not exist in Berlin
        assert!(local_to_utc(berlin(), d("2025-03-30"), t("02:30")).is_none());
    }

    #[test]
    fn test_round_trip() {
        let local_date = d("2025-06-16");
        let local_time = t("14:15");
        let utc = local_to_utc(berlin(), local_date, local_time).unwrap();
        let back = utc_to_local(berlin(), &utc);
        assert_eq!(back.date(), local_date);
        assert_eq!(back.time(), local_time);
    }

    #[test]
    fn test_weekday_index_monday_first() {
        assert_eq!(weekday_index(d("2025-06-16")), 0); // Monday
        assert_eq!(weekday_index(d("2025-06-22")), 6); // Sunday
    }

    #[test]
    fn test_business_tz_fallback() {
        let business = Business {
            id: "b1".to_string(),
            name: "Test".to_string(),
            timezone: "Mars/Olympus_Mons".to_string(),
            staff_scheduling: false,
        };
        assert_eq!(business_tz(&business), Tz::UTC);
    }
}
