use chrono::NaiveDate;
use serde::Serialize;

use crate::models::Appointment;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Service,
    Date,
    Time,
    Staff,
    CustomerName,
    CustomerPhone,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Internal,
    UnknownBusiness,
    DraftNotFound,
}

/// The discriminated result of one dialogue turn, handed back to the
/// enclosing telephony/session layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowReply {
    /// A required slot is missing or failed validation; ask and try again.
    NeedInfo {
        missing: SlotKind,
        question: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        draft_id: Option<String>,
    },
    /// All slots collected; a draft is waiting on an explicit yes.
    Confirm {
        draft_id: String,
        preview: String,
        phrase: String,
    },
    Confirmed {
        appointment: Appointment,
        calendar_synced: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        calendar_error: Option<String>,
    },
    Cancelled {
        appointment: Appointment,
        calendar_synced: bool,
    },
    CancelNotFound,
    Rescheduled {
        appointment: Appointment,
        calendar_synced: bool,
    },
    RescheduleNotFound,
    Info {
        appointment: Appointment,
    },
    InfoNone,
    Availability {
        date: NaiveDate,
        times: Vec<String>,
    },
    AvailabilityNone {
        date: NaiveDate,
    },
    Error {
        kind: ErrorKind,
        details: String,
    },
    /// The intent is not owned by the scheduling core.
    Unhandled,
}
