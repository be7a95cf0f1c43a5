use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::FlowError;
use crate::models::business::minute_to_time;
use crate::models::{Appointment, Business};
use crate::services::{clock, hours};

/// Per-turn memo of "bookings near a given day for a (business, staff)
/// scope". Constructed fresh for every incoming utterance and discarded
/// with it; must never outlive a turn or conflict data goes stale.
pub struct BookingCache {
    entries: HashMap<(Option<String>, NaiveDate), Vec<Appointment>>,
}

impl BookingCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Half-open interval conflict check: `[start, end)` windows touching
    /// at an edge do not conflict. Only non-cancelled appointments count.
    /// With `staff_id = None` the check is business-wide.
    pub fn overlaps(
        &mut self,
        conn: &Connection,
        business_id: &str,
        staff_id: Option<&str>,
        start_at: &NaiveDateTime,
        end_at: &NaiveDateTime,
        exclude: Option<&str>,
    ) -> Result<bool, FlowError> {
        let bookings = self.near_day(conn, business_id, staff_id, start_at.date())?;
        Ok(bookings.iter().any(|b| {
            Some(b.id.as_str()) != exclude && b.start_at < *end_at && b.end_at > *start_at
        }))
    }

    fn near_day(
        &mut self,
        conn: &Connection,
        business_id: &str,
        staff_id: Option<&str>,
        day: NaiveDate,
    ) -> Result<&[Appointment], FlowError> {
        let key = (staff_id.map(str::to_string), day);
        if !self.entries.contains_key(&key) {
            // One fetch covers the day plus a day of slack on both sides,
            // enough for any UTC offset.
            let window_start = (day - Duration::days(1)).and_time(NaiveTime::MIN);
            let window_end = (day + Duration::days(2)).and_time(NaiveTime::MIN);
            let bookings = queries::appointments_overlapping(
                conn,
                business_id,
                staff_id,
                &window_start,
                &window_end,
            )?;
            self.entries.insert(key.clone(), bookings);
        }
        Ok(self.entries.get(&key).map(Vec::as_slice).unwrap_or(&[]))
    }
}

impl Default for BookingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Earliest-first enumeration of conflict-free local start times for one
/// day. A greedy forward scan in fixed steps: deterministic, strictly
/// increasing, no attempt at global packing.
#[allow(clippy::too_many_arguments)]
pub fn find_slots(
    conn: &Connection,
    cache: &mut BookingCache,
    business: &Business,
    staff_id: Option<&str>,
    day: NaiveDate,
    duration_minutes: i32,
    max_results: usize,
    window: Option<(NaiveTime, NaiveTime)>,
    step_minutes: u32,
) -> Result<Vec<NaiveTime>, FlowError> {
    let Some(day_window) = hours::hours_for(conn, business, day)? else {
        return Ok(vec![]);
    };

    let mut open = day_window.open_minute;
    let mut close = day_window.close_minute;
    if let Some((from, to)) = window {
        open = open.max(time_to_minute(from));
        close = close.min(time_to_minute(to));
    }

    let tz = clock::business_tz(business);
    let duration = duration_minutes.max(1) as u32;
    let step = step_minutes.max(1);

    let mut results = vec![];
    let mut cursor = open;
    while cursor + duration <= close && results.len() < max_results {
        let start_time = minute_to_time(cursor);
        // Local times swallowed by a DST gap are skipped.
        if let Some(start_utc) = clock::local_to_utc(tz, day, start_time) {
            let end_utc = start_utc + Duration::minutes(duration as i64);
            if !cache.overlaps(conn, &business.id, staff_id, &start_utc, &end_utc, None)? {
                results.push(start_time);
            }
        }
        cursor += step;
    }

    Ok(results)
}

fn time_to_minute(time: NaiveTime) -> u32 {
    use chrono::Timelike;
    time.hour() * 60 + time.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{AppointmentStatus, BusinessHoursRow};

    fn setup() -> (Connection, Business) {
        let conn = db::init_db(":memory:").unwrap();
        let business = Business {
            id: "b1".to_string(),
            name: "Test Salon".to_string(),
            timezone: "Europe/Berlin".to_string(),
            staff_scheduling: false,
        };
        queries::save_business(&conn, &business).unwrap();
        // Mon-Fri 09:00-18:00
        for weekday in 0..5u8 {
            queries::save_hours(
                &conn,
                "b1",
                &BusinessHoursRow {
                    weekday,
                    open_minute: 9 * 60,
                    close_minute: 18 * 60,
                    closed: false,
                },
            )
            .unwrap();
        }
        (conn, business)
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn book_local(
        conn: &Connection,
        business: &Business,
        id: &str,
        staff_id: Option<&str>,
        day: &str,
        from: &str,
        minutes: i64,
        status: AppointmentStatus,
    ) {
        let tz = clock::business_tz(business);
        let start = clock::local_to_utc(tz, d(day), t(from)).unwrap();
        let appt = Appointment {
            id: id.to_string(),
            business_id: business.id.clone(),
            staff_id: staff_id.map(str::to_string),
            service_id: "s1".to_string(),
            start_at: start,
            end_at: start + Duration::minutes(minutes),
            status,
            customer_name: Some("Alice".to_string()),
            customer_phone: None,
            calendar_ref: None,
            created_at: start,
            updated_at: start,
        };
        queries::create_appointment(conn, &appt).unwrap();
    }

    fn fmt(times: &[NaiveTime]) -> Vec<String> {
        times.iter().map(|t| t.format("%H:%M").to_string()).collect()
    }

    #[test]
    fn test_empty_calendar_earliest_first() {
        let (conn, business) = setup();
        let mut cache = BookingCache::new();

        // 2025-06-16 is a Monday
        let slots = find_slots(
            &conn, &mut cache, &business, None,
            d("2025-06-16"), 30, 3, None, 15,
        )
        .unwrap();

        assert_eq!(fmt(&slots), vec!["09:00", "09:15", "09:30"]);
    }

    #[test]
    fn test_skips_conflicting_candidates() {
        let (conn, business) = setup();
        book_local(
            &conn, &business, "a1", None,
            "2025-06-16", "10:00", 30,
            AppointmentStatus::Booked,
        );
        let mut cache = BookingCache::new();

        let slots = find_slots(
            &conn, &mut cache, &business, None,
            d("2025-06-16"), 30, 1,
            Some((t("09:45"), t("18:00"))), 15,
        )
        .unwrap();

        // 09:45, 10:00 and 10:15 all overlap the 10:00-10:30 booking
        assert_eq!(fmt(&slots), vec!["10:30"]);
    }

    #[test]
    fn test_cancelled_bookings_do_not_conflict() {
        let (conn, business) = setup();
        book_local(
            &conn, &business, "a1", None,
            "2025-06-16", "09:00", 60,
            AppointmentStatus::Cancelled,
        );
        let mut cache = BookingCache::new();

        let slots = find_slots(
            &conn, &mut cache, &business, None,
            d("2025-06-16"), 30, 1, None, 15,
        )
        .unwrap();
        assert_eq!(fmt(&slots), vec!["09:00"]);
    }

    #[test]
    fn test_closed_day_is_empty() {
        let (conn, business) = setup();
        let mut cache = BookingCache::new();

        // 2025-06-22 is a Sunday, no schedule row
        let slots = find_slots(
            &conn, &mut cache, &business, None,
            d("2025-06-22"), 30, 5, None, 15,
        )
        .unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn test_duration_must_fit_before_close() {
        let (conn, business) = setup();
        let mut cache = BookingCache::new();

        let slots = find_slots(
            &conn, &mut cache, &business, None,
            d("2025-06-16"), 60, 10,
            Some((t("16:30"), t("18:00"))), 15,
        )
        .unwrap();

        // 17:15 + 60min would pass 18:00
        assert_eq!(fmt(&slots), vec!["16:30", "16:45", "17:00"]);
    }

    #[test]
    fn test_results_strictly_increasing(){
        let (conn, business) = setup();
        book_local(
            &conn, &business, "a1", None,
            "2025-06-16", "09:30", 30,
            AppointmentStatus::Booked,
        );
        let mut cache = BookingCache::new();

        let slots = find_slots(
            &conn, &mut cache, &business, None,
            d("2025-06-16"), 30, 6, None, 15,
        )
        .unwrap();

        for pair in slots.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_overlap_edges_do_not_conflict() {
        let (conn, business) = setup();
        book_local(
            &conn, &business, "a1", None,
            "2025-06-16", "10:00", 60,
            AppointmentStatus::Booked,
        );
        let tz = clock::business_tz(&business);
        let mut cache = BookingCache::new();

        // Ends exactly when the booking starts
        let start = clock::local_to_utc(tz, d("2025-06-16"), t("09:00")).unwrap();
        let end = start + Duration::minutes(60);
        assert!(!cache
            .overlaps(&conn, "b1", None, &start, &end, None)
            .unwrap());

        // Starts exactly when the booking ends
        let start = clock::local_to_utc(tz, d("2025-06-16"), t("11:00")).unwrap();
        let end = start + Duration::minutes(30);
        assert!(!cache
            .overlaps(&conn, "b1", None, &start, &end, None)
            .unwrap());

        // Genuine overlap
        let start = clock::local_to_utc(tz, d("2025-06-16"), t("10:30")).unwrap();
        let end = start + Duration::minutes(60);
        assert!(cache
            .overlaps(&conn, "b1", None, &start, &end, None)
            .unwrap());
    }

    #[test]
    fn test_staff_scoped_conflicts() {
        let (conn, business) = setup();
        book_local(
            &conn, &business, "a1", Some("st1"),
            "2025-06-16", "10:00", 60,
            AppointmentStatus::Booked,
        );
        let tz = clock::business_tz(&business);
        let mut cache = BookingCache::new();

        let start = clock::local_to_utc(tz, d("2025-06-16"), t("10:00")).unwrap();
        let end = start + Duration::minutes(30);

        // st1 is busy, st2 is not; business-wide sees the conflict
        assert!(cache
            .overlaps(&conn, "b1", Some("st1"), &start, &end, None)
            .unwrap());
        assert!(!cache
            .overlaps(&conn, "b1", Some("st2"), &start, &end, None)
            .unwrap());
        assert!(cache
            .overlaps(&conn, "b1", None, &start, &end, None)
            .unwrap());
    }

    #[test]
    fn test_exclude_own_appointment() {
        let (conn, business) = setup();
        book_local(
            &conn, &business, "a1", None,
            "2025-06-16", "10:00", 60,
            AppointmentStatus::Booked,
        );
        let tz = clock::business_tz(&business);
        let mut cache = BookingCache::new();

        let start = clock::local_to_utc(tz, d("2025-06-16"), t("10:15")).unwrap();
        let end = start + Duration::minutes(30);
        assert!(!cache
            .overlaps(&conn, "b1", None, &start, &end, Some("a1"))
            .unwrap());
    }
}
