use rusqlite::Connection;

use crate::db::queries;
use crate::errors::FlowError;
use crate::models::business::minute_to_time;
use crate::models::{Business, DayWindow};
use crate::services::clock;

/// Open/close window for the given local calendar day, or `None` when the
/// business is closed. A missing schedule row counts as closed.
pub fn hours_for(
    conn: &Connection,
    business: &Business,
    date: chrono::NaiveDate,
) -> Result<Option<DayWindow>, FlowError> {
    let weekday = clock::weekday_index(date);
    let row = queries::hours_row(conn, &business.id, weekday)?;

    Ok(row.and_then(|r| {
        if r.closed || r.close_minute <= r.open_minute {
            None
        } else {
            Some(DayWindow {
                open_minute: r.open_minute,
                close_minute: r.close_minute,
            })
        }
    }))
}

/// "Mon 09:00-18:00, Tue 09:00-18:00, ..." for clarifying questions.
pub fn human_hours(conn: &Connection, business: &Business) -> Result<String, FlowError> {
    const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    let rows = queries::list_hours(conn, &business.id)?;
    let parts: Vec<String> = rows
        .iter()
        .filter(|r| !r.closed && r.close_minute > r.open_minute)
        .map(|r| {
            format!(
                "{} {}-{}",
                DAY_NAMES[r.weekday.min(6) as usize],
                minute_to_time(r.open_minute).format("%H:%M"),
                minute_to_time(r.close_minute).format("%H:%M"),
            )
        })
        .collect();

    Ok(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::BusinessHoursRow;
    use chrono::NaiveDate;

    fn setup() -> (Connection, Business) {
        let conn = db::init_db(":memory:").unwrap();
        let business = Business {
            id: "b1".to_string(),
            name: "Test Salon".to_string(),
            timezone: "Europe/Berlin".to_string(),
            staff_scheduling: false,
        };
        queries::save_business(&conn, &business).unwrap();
        (conn, business)
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_open_day() {
        let (conn, business) = setup();
        queries::save_hours(
            &conn,
            "b1",
            &BusinessHoursRow {
                weekday: 0,
                open_minute: 9 * 60,
                close_minute: 18 * 60,
                closed: false,
            },
        )
        .unwrap();

        // 2025-06-16 is a Monday
        let window = hours_for(&conn, &business, d("2025-06-16")).unwrap().unwrap();
        assert_eq!(window.open_minute, 540);
        assert_eq!(window.close_minute, 1080);
        assert_eq!(window.open_time().format("%H:%M").to_string(), "09:00");
    }

    #[test]
    fn test_missing_row_is_closed() {
        let (conn, business) = setup();
        assert!(hours_for(&conn, &business, d("2025-06-16")).unwrap().is_none());
    }

    #[test]
    fn test_closed_flag() {
        let (conn, business) = setup();
        queries::save_hours(
            &conn,
            "b1",
            &BusinessHoursRow {
                weekday: 6,
                open_minute: 0,
                close_minute: 0,
                closed: true,
            },
        )
        .unwrap();

        // 2025-06-22 is a Sunday
        assert!(hours_for(&conn, &business, d("2025-06-22")).unwrap().is_none());
    }

    #[test]
    fn test_human_hours() {
        let (conn, business) = setup();
        for weekday in 0..5u8 {
            queries::save_hours(
                &conn,
                "b1",
                &BusinessHoursRow {
                    weekday,
                    open_minute: 9 * 60,
                    close_minute: 17 * 60,
                    closed: false,
                },
            )
            .unwrap();
        }
        queries::save_hours(
            &conn,
            "b1",
            &BusinessHoursRow {
                weekday: 5,
                open_minute: 0,
                close_minute: 0,
                closed: true,
            },
        )
        .unwrap();

        let readable = human_hours(&conn, &business).unwrap();
        assert!(readable.starts_with("Mon 09:00-17:00"));
        assert!(readable.contains("Fri 09:00-17:00"));
        assert!(!readable.contains("Sat"));
    }
}
