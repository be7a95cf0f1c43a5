use chrono::{NaiveDateTime, Timelike};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::FlowError;
use crate::models::{Appointment, AppointmentDraft, AppointmentStatus, Business};
use crate::services::scheduling::BookingCache;
use crate::services::{clock, hours};

#[allow(clippy::too_many_arguments)]
pub fn create_draft(
    conn: &Connection,
    business: &Business,
    service_id: &str,
    staff_id: Option<&str>,
    start_at: NaiveDateTime,
    end_at: NaiveDateTime,
    customer_name: Option<&str>,
    customer_phone: Option<&str>,
    now: NaiveDateTime,
) -> Result<AppointmentDraft, FlowError> {
    let draft = AppointmentDraft {
        id: uuid::Uuid::new_v4().to_string(),
        business_id: business.id.clone(),
        service_id: service_id.to_string(),
        staff_id: staff_id.map(str::to_string),
        start_at,
        end_at,
        customer_name: customer_name.map(str::to_string),
        customer_phone: customer_phone.map(str::to_string),
        created_at: now,
    };
    queries::insert_draft(conn, &draft)?;
    Ok(draft)
}

pub fn discard_draft(conn: &Connection, draft_id: &str) -> Result<bool, FlowError> {
    Ok(queries::delete_draft(conn, draft_id)?)
}

/// Turn a draft into a booked appointment. Hours and conflicts are
/// re-validated at confirm time — the world may have changed since the
/// draft was proposed. Runs in one transaction: a second confirmation of
/// the same draft gets a deterministic `DraftNotFound`, and a validation
/// failure rolls back leaving the draft intact for retry.
pub fn confirm_draft(
    conn: &mut Connection,
    business: &Business,
    draft_id: &str,
    now: NaiveDateTime,
) -> Result<Appointment, FlowError> {
    let tx = conn.transaction()?;

    let Some(draft) = queries::get_draft(&tx, draft_id)? else {
        return Err(FlowError::DraftNotFound(draft_id.to_string()));
    };
    queries::delete_draft(&tx, draft_id)?;

    let tz = clock::business_tz(business);
    let start_local = clock::utc_to_local(tz, &draft.start_at);
    let end_local = clock::utc_to_local(tz, &draft.end_at);
    let day = start_local.date();

    let Some(window) = hours::hours_for(&tx, business, day)? else {
        return Err(FlowError::OutsideHours);
    };
    let start_minute = start_local.time().hour() * 60 + start_local.time().minute();
    let end_minute = end_local.time().hour() * 60 + end_local.time().minute();
    if end_local.date() != day
        || start_minute < window.open_minute
        || end_minute > window.close_minute
    {
        return Err(FlowError::OutsideHours);
    }

    let mut cache = BookingCache::new();
    if cache.overlaps(
        &tx,
        &business.id,
        draft.staff_id.as_deref(),
        &draft.start_at,
        &draft.end_at,
        None,
    )? {
        return Err(FlowError::SlotTaken);
    }

    let appointment = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        business_id: draft.business_id.clone(),
        staff_id: draft.staff_id.clone(),
        service_id: draft.service_id.clone(),
        start_at: draft.start_at,
        end_at: draft.end_at,
        status: AppointmentStatus::Booked,
        customer_name: draft.customer_name.clone(),
        customer_phone: draft.customer_phone.clone(),
        calendar_ref: None,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = queries::create_appointment(&tx, &appointment) {
        // The partial unique index on booked (business, staff, start) fires
        // when a concurrent confirmation won the slot.
        if is_unique_violation(&e) {
            return Err(FlowError::SlotTaken);
        }
        return Err(e.into());
    }

    tx.commit()?;
    Ok(appointment)
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::BusinessHoursRow;
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn setup() -> (Connection, Business) {
        let conn = db::init_db(":memory:").unwrap();
        let business = Business {
            id: "b1".to_string(),
            name: "Test Salon".to_string(),
            timezone: "Europe/Berlin".to_string(),
            staff_scheduling: false,
        };
        queries::save_business(&conn, &business).unwrap();
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

    fn berlin_utc(day: &str, time: &str) -> NaiveDateTime {
        let tz: chrono_tz::Tz = "Europe/Berlin".parse().unwrap();
        clock::local_to_utc(
            tz,
            NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap(),
            NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
        )
        .unwrap()
    }

    fn now() -> NaiveDateTime {
        berlin_utc("2025-06-10", "12:00")
    }

    #[test]
    fn test_create_then_confirm_round_trip() {
        let (mut conn, business) = setup();
        let start = berlin_utc("2025-06-16", "10:00");
        let end = start + Duration::minutes(30);

        let draft = create_draft(
            &conn, &business, "s1", None, start, end,
            Some("Alice"), Some("+4915112345678"), now(),
        )
        .unwrap();

        let appt = confirm_draft(&mut conn, &business, &draft.id, now()).unwrap();
        assert_eq!(appt.start_at, draft.start_at);
        assert_eq!(appt.end_at, draft.end_at);
        assert_eq!(appt.status, AppointmentStatus::Booked);
        assert_eq!(appt.customer_name.as_deref(), Some("Alice"));

        // Draft is consumed
        assert!(queries::get_draft(&conn, &draft.id).unwrap().is_none());
    }

    #[test]
    fn test_double_confirm_is_deterministic_not_found() {
        let (mut conn, business) = setup();
        let start = berlin_utc("2025-06-16", "10:00");
        let draft = create_draft(
            &conn, &business, "s1", None,
            start, start + Duration::minutes(30),
            Some("Alice"), None, now(),
        )
        .unwrap();

        confirm_draft(&mut conn, &business, &draft.id, now()).unwrap();
        let second = confirm_draft(&mut conn, &business, &draft.id, now());
        assert!(matches!(second, Err(FlowError::DraftNotFound(_))));

        // Still exactly one appointment
        let day_start = berlin_utc("2025-06-16", "09:00");
        let day_end = berlin_utc("2025-06-16", "18:00");
        let booked =
            queries::appointments_overlapping(&conn, "b1", None, &day_start, &day_end).unwrap();
        assert_eq!(booked.len(), 1);
    }

    #[test]
    fn test_confirm_fails_when_slot_taken_and_draft_survives() {
        let (mut conn, business) = setup();
        let start = berlin_utc("2025-06-16", "10:00");
        let end = start + Duration::minutes(30);

        let first = create_draft(
            &conn, &business, "s1", None, start, end, Some("Alice"), None, now(),
        )
        .unwrap();
        let second = create_draft(
            &conn, &business, "s1", None, start, end, Some("Bob"), None, now(),
        )
        .unwrap();

        confirm_draft(&mut conn, &business, &first.id, now()).unwrap();

        let result = confirm_draft(&mut conn, &business, &second.id, now());
        assert!(matches!(result, Err(FlowError::SlotTaken)));

        // The losing draft is still there for retry
        assert!(queries::get_draft(&conn, &second.id).unwrap().is_some());
    }

    #[test]
    fn test_confirm_fails_outside_hours() {
        let (mut conn, business) = setup();
        // 2025-06-22 is a Sunday — closed
        let start = berlin_utc("2025-06-22", "10:00");
        let draft = create_draft(
            &conn, &business, "s1", None,
            start, start + Duration::minutes(30),
            Some("Alice"), None, now(),
        )
        .unwrap();

        let result = confirm_draft(&mut conn, &business, &draft.id, now());
        assert!(matches!(result, Err(FlowError::OutsideHours)));
        assert!(queries::get_draft(&conn, &draft.id).unwrap().is_some());
    }

    #[test]
    fn test_discard() {
        let (conn, business) = setup();
        let start = berlin_utc("2025-06-16", "10:00");
        let draft = create_draft(
            &conn, &business, "s1", None,
            start, start + Duration::minutes(30),
            None, None, now(),
        )
        .unwrap();

        assert!(discard_draft(&conn, &draft.id).unwrap());
        assert!(!discard_draft(&conn, &draft.id).unwrap());
    }
}
