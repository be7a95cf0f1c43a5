use anyhow::Context;
use chrono::{Duration, NaiveDateTime};
use rusqlite::{params, Connection};

use crate::models::{
    Appointment, AppointmentContext, AppointmentDraft, AppointmentStatus, Business,
    BusinessHoursRow, ConversationRecord, Service, Staff,
};

const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DT_FORMAT).to_string()
}

pub fn parse_dt(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DT_FORMAT)
        .with_context(|| format!("invalid stored datetime: {s}"))
}

// ── Businesses ──

pub fn save_business(conn: &Connection, business: &Business) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, name, timezone, staff_scheduling)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           timezone = excluded.timezone,
           staff_scheduling = excluded.staff_scheduling",
        params![
            business.id,
            business.name,
            business.timezone,
            business.staff_scheduling as i32,
        ],
    )?;
    Ok(())
}

pub fn get_business(conn: &Connection, id: &str) -> anyhow::Result<Option<Business>> {
    let result = conn.query_row(
        "SELECT id, name, timezone, staff_scheduling FROM businesses WHERE id = ?1",
        params![id],
        |row| {
            Ok(Business {
                id: row.get(0)?,
                name: row.get(1)?,
                timezone: row.get(2)?,
                staff_scheduling: row.get::<_, i32>(3)? != 0,
            })
        },
    );

    match result {
        Ok(business) => Ok(Some(business)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Business Hours ──

pub fn save_hours(
    conn: &Connection,
    business_id: &str,
    row: &BusinessHoursRow,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO business_hours (business_id, weekday, open_minute, close_minute, closed)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(business_id, weekday) DO UPDATE SET
           open_minute = excluded.open_minute,
           close_minute = excluded.close_minute,
           closed = excluded.closed",
        params![
            business_id,
            row.weekday,
            row.open_minute,
            row.close_minute,
            row.closed as i32,
        ],
    )?;
    Ok(())
}

pub fn hours_row(
    conn: &Connection,
    business_id: &str,
    weekday: u8,
) -> anyhow::Result<Option<BusinessHoursRow>> {
    let result = conn.query_row(
        "SELECT weekday, open_minute, close_minute, closed
         FROM business_hours WHERE business_id = ?1 AND weekday = ?2",
        params![business_id, weekday],
        |row| {
            Ok(BusinessHoursRow {
                weekday: row.get(0)?,
                open_minute: row.get(1)?,
                close_minute: row.get(2)?,
                closed: row.get::<_, i32>(3)? != 0,
            })
        },
    );

    match result {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_hours(conn: &Connection, business_id: &str) -> anyhow::Result<Vec<BusinessHoursRow>> {
    let mut stmt = conn.prepare(
        "SELECT weekday, open_minute, close_minute, closed
         FROM business_hours WHERE business_id = ?1 ORDER BY weekday ASC",
    )?;

    let rows = stmt.query_map(params![business_id], |row| {
        Ok(BusinessHoursRow {
            weekday: row.get(0)?,
            open_minute: row.get(1)?,
            close_minute: row.get(2)?,
            closed: row.get::<_, i32>(3)? != 0,
        })
    })?;

    let mut hours = vec![];
    for row in rows {
        hours.push(row?);
    }
    Ok(hours)
}

// ── Services ──

pub fn save_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, business_id, title, duration_minutes, default_staff_id, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           duration_minutes = excluded.duration_minutes,
           default_staff_id = excluded.default_staff_id,
           active = excluded.active",
        params![
            service.id,
            service.business_id,
            service.title,
            service.duration_minutes,
            service.default_staff_id,
            service.active as i32,
        ],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let result = conn.query_row(
        "SELECT id, business_id, title, duration_minutes, default_staff_id, active
         FROM services WHERE id = ?1",
        params![id],
        |row| {
            Ok(Service {
                id: row.get(0)?,
                business_id: row.get(1)?,
                title: row.get(2)?,
                duration_minutes: row.get(3)?,
                default_staff_id: row.get(4)?,
                active: row.get::<_, i32>(5)? != 0,
            })
        },
    );

    match result {
        Ok(service) => Ok(Some(service)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_active_services(conn: &Connection, business_id: &str) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, business_id, title, duration_minutes, default_staff_id, active
         FROM services WHERE business_id = ?1 AND active = 1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![business_id], |row| {
        Ok(Service {
            id: row.get(0)?,
            business_id: row.get(1)?,
            title: row.get(2)?,
            duration_minutes: row.get(3)?,
            default_staff_id: row.get(4)?,
            active: row.get::<_, i32>(5)? != 0,
        })
    })?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

// ── Staff ──

pub fn save_staff(conn: &Connection, staff: &Staff) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO staff (id, business_id, display_name, calendar_ref)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           display_name = excluded.display_name,
           calendar_ref = excluded.calendar_ref",
        params![staff.id, staff.business_id, staff.display_name, staff.calendar_ref],
    )?;
    Ok(())
}

pub fn get_staff(conn: &Connection, id: &str) -> anyhow::Result<Option<Staff>> {
    let result = conn.query_row(
        "SELECT id, business_id, display_name, calendar_ref FROM staff WHERE id = ?1",
        params![id],
        |row| {
            Ok(Staff {
                id: row.get(0)?,
                business_id: row.get(1)?,
                display_name: row.get(2)?,
                calendar_ref: row.get(3)?,
            })
        },
    );

    match result {
        Ok(staff) => Ok(Some(staff)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Roster in stable id order; the first-free staff policy depends on this
/// ordering being deterministic.
pub fn list_staff(conn: &Connection, business_id: &str) -> anyhow::Result<Vec<Staff>> {
    let mut stmt = conn.prepare(
        "SELECT id, business_id, display_name, calendar_ref
         FROM staff WHERE business_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![business_id], |row| {
        Ok(Staff {
            id: row.get(0)?,
            business_id: row.get(1)?,
            display_name: row.get(2)?,
            calendar_ref: row.get(3)?,
        })
    })?;

    let mut staff = vec![];
    for row in rows {
        staff.push(row?);
    }
    Ok(staff)
}

pub fn find_staff_by_name(
    conn: &Connection,
    business_id: &str,
    name: &str,
) -> anyhow::Result<Option<Staff>> {
    let result = conn.query_row(
        "SELECT id, business_id, display_name, calendar_ref
         FROM staff WHERE business_id = ?1 AND lower(display_name) = lower(?2)",
        params![business_id, name.trim()],
        |row| {
            Ok(Staff {
                id: row.get(0)?,
                business_id: row.get(1)?,
                display_name: row.get(2)?,
                calendar_ref: row.get(3)?,
            })
        },
    );

    match result {
        Ok(staff) => Ok(Some(staff)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, business_id, staff_id, service_id, start_at, end_at, \
     status, customer_name, customer_phone, calendar_ref, created_at, updated_at";

pub fn create_appointment(conn: &Connection, appt: &Appointment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, business_id, staff_id, service_id, start_at, end_at, status, customer_name, customer_phone, calendar_ref, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            appt.id,
            appt.business_id,
            appt.staff_id,
            appt.service_id,
            fmt_dt(&appt.start_at),
            fmt_dt(&appt.end_at),
            appt.status.as_str(),
            appt.customer_name,
            appt.customer_phone,
            appt.calendar_ref,
            fmt_dt(&appt.created_at),
            fmt_dt(&appt.updated_at),
        ],
    )?;
    Ok(())
}

/// Non-cancelled appointments whose [start, end) interval intersects the
/// given window, optionally narrowed to one staff member.
pub fn appointments_overlapping(
    conn: &Connection,
    business_id: &str,
    staff_id: Option<&str>,
    window_start: &NaiveDateTime,
    window_end: &NaiveDateTime,
) -> anyhow::Result<Vec<Appointment>> {
    let start_str = fmt_dt(window_start);
    let end_str = fmt_dt(window_end);

    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE business_id = ?1 AND status != 'cancelled'
           AND start_at < ?2 AND end_at > ?3{}
         ORDER BY start_at ASC",
        if staff_id.is_some() { " AND staff_id = ?4" } else { "" },
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut appointments = vec![];
    match staff_id {
        Some(staff) => {
            let rows = stmt.query_map(params![business_id, end_str, start_str, staff], |row| {
                Ok(parse_appointment_row(row))
            })?;
            for row in rows {
                appointments.push(row??);
            }
        }
        None => {
            let rows = stmt.query_map(params![business_id, end_str, start_str], |row| {
                Ok(parse_appointment_row(row))
            })?;
            for row in rows {
                appointments.push(row??);
            }
        }
    }
    Ok(appointments)
}

pub fn get_appointment(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
        params![id],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set_appointment_status(
    conn: &Connection,
    id: &str,
    status: AppointmentStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn update_appointment_window(
    conn: &Connection,
    id: &str,
    start_at: &NaiveDateTime,
    end_at: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET start_at = ?1, end_at = ?2, updated_at = ?3 WHERE id = ?4",
        params![fmt_dt(start_at), fmt_dt(end_at), fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn set_calendar_ref(
    conn: &Connection,
    id: &str,
    calendar_ref: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE appointments SET calendar_ref = ?1 WHERE id = ?2",
        params![calendar_ref, id],
    )?;
    Ok(())
}

/// Exact-start lookup used by cancellation: the booked appointment starting
/// at the given instant for the given customer name.
pub fn find_booked_at(
    conn: &Connection,
    business_id: &str,
    start_at: &NaiveDateTime,
    customer_name: &str,
) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE business_id = ?1 AND status = 'booked' AND start_at = ?2
               AND lower(customer_name) = lower(?3)"
        ),
        params![business_id, fmt_dt(start_at), customer_name.trim()],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The nearest future booked appointment for a customer identified by name
/// and/or phone.
pub fn next_for_customer(
    conn: &Connection,
    business_id: &str,
    customer_name: Option<&str>,
    customer_phone: Option<&str>,
    after: &NaiveDateTime,
) -> anyhow::Result<Option<Appointment>> {
    let ident = match (customer_name, customer_phone) {
        (Some(_), Some(_)) => "(lower(customer_name) = lower(?3) OR customer_phone = ?4)",
        (Some(_), None) => "lower(customer_name) = lower(?3)",
        (None, Some(_)) => "customer_phone = ?3",
        (None, None) => return Ok(None),
    };

    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE business_id = ?1 AND status = 'booked' AND start_at > ?2 AND {ident}
         ORDER BY start_at ASC LIMIT 1"
    );
    let after_str = fmt_dt(after);

    let result = match (customer_name, customer_phone) {
        (Some(name), Some(phone)) => conn.query_row(
            &sql,
            params![business_id, after_str, name.trim(), phone.trim()],
            |row| Ok(parse_appointment_row(row)),
        ),
        (Some(name), None) => conn.query_row(
            &sql,
            params![business_id, after_str, name.trim()],
            |row| Ok(parse_appointment_row(row)),
        ),
        (None, Some(phone)) => conn.query_row(
            &sql,
            params![business_id, after_str, phone.trim()],
            |row| Ok(parse_appointment_row(row)),
        ),
        (None, None) => unreachable!(),
    };

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let start_at_str: String = row.get(4)?;
    let end_at_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_at_str: String = row.get(10)?;
    let updated_at_str: String = row.get(11)?;

    Ok(Appointment {
        id: row.get(0)?,
        business_id: row.get(1)?,
        staff_id: row.get(2)?,
        service_id: row.get(3)?,
        start_at: parse_dt(&start_at_str)?,
        end_at: parse_dt(&end_at_str)?,
        status: AppointmentStatus::parse(&status_str),
        customer_name: row.get(7)?,
        customer_phone: row.get(8)?,
        calendar_ref: row.get(9)?,
        created_at: parse_dt(&created_at_str)?,
        updated_at: parse_dt(&updated_at_str)?,
    })
}

// ── Appointment Drafts ──

pub fn insert_draft(conn: &Connection, draft: &AppointmentDraft) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO appointment_drafts (id, business_id, service_id, staff_id, start_at, end_at, customer_name, customer_phone, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            draft.id,
            draft.business_id,
            draft.service_id,
            draft.staff_id,
            fmt_dt(&draft.start_at),
            fmt_dt(&draft.end_at),
            draft.customer_name,
            draft.customer_phone,
            fmt_dt(&draft.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_draft(conn: &Connection, id: &str) -> anyhow::Result<Option<AppointmentDraft>> {
    let result = conn.query_row(
        "SELECT id, business_id, service_id, staff_id, start_at, end_at, customer_name, customer_phone, created_at
         FROM appointment_drafts WHERE id = ?1",
        params![id],
        |row| {
            let start_at_str: String = row.get(4)?;
            let end_at_str: String = row.get(5)?;
            let created_at_str: String = row.get(8)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                start_at_str,
                end_at_str,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                created_at_str,
            ))
        },
    );

    match result {
        Ok((id, business_id, service_id, staff_id, start, end, name, phone, created)) => {
            Ok(Some(AppointmentDraft {
                id,
                business_id,
                service_id,
                staff_id,
                start_at: parse_dt(&start)?,
                end_at: parse_dt(&end)?,
                customer_name: name,
                customer_phone: phone,
                created_at: parse_dt(&created)?,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_draft(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM appointment_drafts WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn set_draft_customer(
    conn: &Connection,
    id: &str,
    customer_name: Option<&str>,
    customer_phone: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE appointment_drafts SET customer_name = ?1, customer_phone = ?2 WHERE id = ?3",
        params![customer_name, customer_phone, id],
    )?;
    Ok(())
}

// ── Conversation State ──

/// Load-or-create the session row. Idempotent: a second call for the same
/// key returns the same row. An expired row is reset in place rather than
/// duplicated.
pub fn ensure_conversation(
    conn: &Connection,
    business_id: &str,
    channel: &str,
    session_key: &str,
    now: &NaiveDateTime,
    ttl_minutes: i64,
) -> anyhow::Result<ConversationRecord> {
    let now_str = fmt_dt(now);
    let expires = *now + Duration::minutes(ttl_minutes);

    conn.execute(
        "INSERT INTO conversation_state (business_id, channel, session_key, context, updated_at, expires_at)
         VALUES (?1, ?2, ?3, '{}', ?4, ?5)
         ON CONFLICT(business_id, channel, session_key) DO NOTHING",
        params![business_id, channel, session_key, now_str, fmt_dt(&expires)],
    )?;

    let (id, last_intent, context_json, updated_at_str, expires_at_str) = conn.query_row(
        "SELECT id, last_intent, context, updated_at, expires_at
         FROM conversation_state
         WHERE business_id = ?1 AND channel = ?2 AND session_key = ?3",
        params![business_id, channel, session_key],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        },
    )?;

    let expires_at = parse_dt(&expires_at_str)?;
    let expired = expires_at <= *now;

    let context: AppointmentContext = if expired {
        AppointmentContext::default()
    } else {
        serde_json::from_str(&context_json).unwrap_or_else(|_| {
            tracing::warn!(session = session_key, "invalid context blob, resetting");
            AppointmentContext::default()
        })
    };

    let mut record = ConversationRecord {
        id,
        business_id: business_id.to_string(),
        channel: channel.to_string(),
        session_key: session_key.to_string(),
        last_intent: if expired { None } else { last_intent },
        context,
        updated_at: parse_dt(&updated_at_str)?,
        expires_at,
    };

    if expired {
        record.updated_at = *now;
        record.expires_at = expires;
        save_conversation(conn, &record)?;
    }

    Ok(record)
}

/// Full overwrite of the context blob; callers merge first.
pub fn save_conversation(conn: &Connection, record: &ConversationRecord) -> anyhow::Result<()> {
    let context_json = serde_json::to_string(&record.context)?;
    conn.execute(
        "UPDATE conversation_state
         SET last_intent = ?1, context = ?2, updated_at = ?3, expires_at = ?4
         WHERE id = ?5",
        params![
            record.last_intent,
            context_json,
            fmt_dt(&record.updated_at),
            fmt_dt(&record.expires_at),
            record.id,
        ],
    )?;
    Ok(())
}

pub fn clear_conversation(
    conn: &Connection,
    business_id: &str,
    channel: &str,
    session_key: &str,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM conversation_state
         WHERE business_id = ?1 AND channel = ?2 AND session_key = ?3",
        params![business_id, channel, session_key],
    )?;
    Ok(count > 0)
}

pub fn expire_old_conversations(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM conversation_state WHERE expires_at <= ?1",
        params![fmt_dt(now)],
    )?;
    Ok(count)
}
