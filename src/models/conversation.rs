use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Which flow the session is currently collecting slots for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DialogueMode {
    Booking,
    Cancel,
    Reschedule,
    Info,
    Availability,
}

/// Partially filled booking slots, persisted between turns as the session's
/// context blob. Every field is optional; absent means "not collected yet".
/// Deserialization is lenient so a stale or hand-edited blob degrades to
/// missing slots instead of failing the turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppointmentContext {
    #[serde(default)]
    pub mode: Option<DialogueMode>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub service_id: Option<String>,
    /// Staff member as named by the caller; resolved against the roster at
    /// decision time, never trusted as an id.
    #[serde(default)]
    pub staff_name: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub draft_id: Option<String>,
    #[serde(default)]
    pub window_start: Option<NaiveTime>,
    #[serde(default)]
    pub window_end: Option<NaiveTime>,
}

/// One durable conversation row, keyed by (business, channel, session key).
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: i64,
    pub business_id: String,
    pub channel: String,
    pub session_key: String,
    pub last_intent: Option<String>,
    pub context: AppointmentContext,
    pub updated_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
