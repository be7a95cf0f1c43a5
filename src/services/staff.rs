use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::FlowError;
use crate::models::{Business, Service, Staff};
use crate::services::scheduling::BookingCache;

/// Outcome of staff assignment for a candidate window. Only meaningful for
/// businesses with per-staff scheduling; staffless businesses skip this
/// entirely.
#[derive(Debug)]
pub enum StaffDecision {
    Assigned(Staff),
    /// The caller named someone who is not on the roster. Never silently
    /// falls back to another staff member.
    NotFound(String),
    /// The explicitly requested staff member has a conflicting booking.
    Busy(Staff),
    /// Nobody on the roster is free for the window.
    NoneFree,
}

/// Policies in order: explicit request, service default if free, first
/// free member of the roster (stable id order).
pub fn resolve_staff(
    conn: &Connection,
    cache: &mut BookingCache,
    business: &Business,
    service: &Service,
    requested_name: Option<&str>,
    start_at: &NaiveDateTime,
    end_at: &NaiveDateTime,
) -> Result<StaffDecision, FlowError> {
    if let Some(name) = requested_name {
        return match queries::find_staff_by_name(conn, &business.id, name)? {
            None => Ok(StaffDecision::NotFound(name.trim().to_string())),
            Some(staff) => {
                if cache.overlaps(conn, &business.id, Some(&staff.id), start_at, end_at, None)? {
                    Ok(StaffDecision::Busy(staff))
                } else {
                    Ok(StaffDecision::Assigned(staff))
                }
            }
        };
    }

    if let Some(default_id) = &service.default_staff_id {
        if let Some(staff) = queries::get_staff(conn, default_id)? {
            if !cache.overlaps(conn, &business.id, Some(&staff.id), start_at, end_at, None)? {
                return Ok(StaffDecision::Assigned(staff));
            }
        }
    }

    for staff in queries::list_staff(conn, &business.id)? {
        if !cache.overlaps(conn, &business.id, Some(&staff.id), start_at, end_at, None)? {
            return Ok(StaffDecision::Assigned(staff));
        }
    }

    Ok(StaffDecision::NoneFree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{Appointment, AppointmentStatus};
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn setup() -> (Connection, Business, Service) {
        let conn = db::init_db(":memory:").unwrap();
        let business = Business {
            id: "b1".to_string(),
            name: "Test Salon".to_string(),
            timezone: "UTC".to_string(),
            staff_scheduling: true,
        };
        queries::save_business(&conn, &business).unwrap();
        for (id, name) in [("st1", "Dana"), ("st2", "Max")] {
            queries::save_staff(
                &conn,
                &Staff {
                    id: id.to_string(),
                    business_id: "b1".to_string(),
                    display_name: name.to_string(),
                    calendar_ref: None,
                },
            )
            .unwrap();
        }
        let service = Service {
            id: "s1".to_string(),
            business_id: "b1".to_string(),
            title: "Haircut".to_string(),
            duration_minutes: 30,
            default_staff_id: None,
            active: true,
        };
        queries::save_service(&conn, &service).unwrap();
        (conn, business, service)
    }

    fn window() -> (NaiveDateTime, NaiveDateTime) {
        let start = NaiveDate::parse_from_str("2025-06-16", "%Y-%m-%d")
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        (start, start + Duration::minutes(30))
    }

    fn book(conn: &Connection, id: &str, staff_id: &str) {
        let (start, end) = window();
        queries::create_appointment(
            conn,
            &Appointment {
                id: id.to_string(),
                business_id: "b1".to_string(),
                staff_id: Some(staff_id.to_string()),
                service_id: "s1".to_string(),
                start_at: start,
                end_at: end,
                status: AppointmentStatus::Booked,
                customer_name: Some("Alice".to_string()),
                customer_phone: None,
                calendar_ref: None,
                created_at: start,
                updated_at: start,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_explicit_name_case_insensitive() {
        let (conn, business, service) = setup();
        let (start, end) = window();
        let mut cache = BookingCache::new();

        let decision = resolve_staff(
            &conn, &mut cache, &business, &service,
            Some("dana"), &start, &end,
        )
        .unwrap();
        assert!(matches!(decision, StaffDecision::Assigned(s) if s.id == "st1"));
    }

    #[test]
    fn test_explicit_name_not_found() {
        let (conn, business, service) = setup();
        let (start, end) = window();
        let mut cache = BookingCache::new();

        let decision = resolve_staff(
            &conn, &mut cache, &business, &service,
            Some("Charlie"), &start, &end,
        )
        .unwrap();
        assert!(matches!(decision, StaffDecision::NotFound(name) if name == "Charlie"));
    }

    #[test]
    fn test_explicit_name_busy() {
        let (conn, business, service) = setup();
        book(&conn, "a1", "st1");
        let (start, end) = window();
        let mut cache = BookingCache::new();

        let decision = resolve_staff(
            &conn, &mut cache, &business, &service,
            Some("Dana"), &start, &end,
        )
        .unwrap();
        assert!(matches!(decision, StaffDecision::Busy(s) if s.id == "st1"));
    }

    #[test]
    fn test_service_default_preferred_when_free() {
        let (conn, business, mut service) = setup();
        service.default_staff_id = Some("st2".to_string());
        let (start, end) = window();
        let mut cache = BookingCache::new();

        let decision = resolve_staff(
            &conn, &mut cache, &business, &service,
            None, &start, &end,
        )
        .unwrap();
        assert!(matches!(decision, StaffDecision::Assigned(s) if s.id == "st2"));
    }

    #[test]
    fn test_default_busy_falls_through_to_first_free() {
        let (conn, business, mut service) = setup();
        service.default_staff_id = Some("st2".to_string());
        book(&conn, "a1", "st2");
        let (start, end) = window();
        let mut cache = BookingCache::new();

        let decision = resolve_staff(
            &conn, &mut cache, &business, &service,
            None, &start, &end,
        )
        .unwrap();
        assert!(matches!(decision, StaffDecision::Assigned(s) if s.id == "st1"));
    }

    #[test]
    fn test_none_free() {
        let (conn, business, service) = setup();
        book(&conn, "a1", "st1");
        book(&conn, "a2", "st2");
        let (start, end) = window();
        let mut cache = BookingCache::new();

        let decision = resolve_staff(
            &conn, &mut cache, &business, &service,
            None, &start, &end,
        )
        .unwrap();
        assert!(matches!(decision, StaffDecision::NoneFree));
    }
}
