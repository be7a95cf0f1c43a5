//! Normalization of raw classifier slot candidates into canonical values.
//! Everything here is pure and returns `None` on failure; a slot that does
//! not normalize is simply still missing.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

use crate::models::Service;

/// Strict `YYYY-MM-DD`.
pub fn as_calendar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Strict 24h `HH:MM`.
pub fn as_clock_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    let (hh, mm) = raw.split_once(':')?;
    if hh.len() != 2 || mm.len() != 2 {
        return None;
    }
    let hour: u32 = hh.parse().ok()?;
    let minute: u32 = mm.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Absolute date, or relative language ("today", "tomorrow", weekday names,
/// optionally prefixed with "next") resolved against the business's today.
/// A bare weekday name means the next occurrence strictly after today.
pub fn resolve_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(date) = as_calendar_date(raw) {
        return Some(date);
    }

    let lowered = raw.trim().to_lowercase();
    let lowered = lowered.strip_prefix("next ").unwrap_or(&lowered);

    match lowered {
        "today" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        _ => {}
    }

    let target = parse_weekday_name(lowered)?;
    let ahead = (target.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let ahead = if ahead == 0 { 7 } else { ahead };
    Some(today + Duration::days(ahead))
}

fn parse_weekday_name(s: &str) -> Option<Weekday> {
    match s {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Case-insensitive containment match against the active service list,
/// first match wins. Containment goes both ways so "men's haircut please"
/// finds "Haircut".
pub fn match_service<'a>(services: &'a [Service], raw: &str) -> Option<&'a Service> {
    let needle = raw.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    services.iter().filter(|s| s.active).find(|s| {
        let title = s.title.to_lowercase();
        title.contains(&needle) || needle.contains(&title)
    })
}

/// Non-empty trimmed free text (names, phone numbers).
pub fn as_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
