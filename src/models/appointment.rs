use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A confirmed booking. Instants are UTC. Never hard-deleted; cancellation
/// flips the status so the interval stops counting toward conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub business_id: String,
    pub staff_id: Option<String>,
    pub service_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub calendar_ref: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Booked,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Booked => "booked",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cancelled" => AppointmentStatus::Cancelled,
            _ => AppointmentStatus::Booked,
        }
    }
}

/// An unconfirmed booking proposal. Lives for at most one dialogue session;
/// consumed by confirmation or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentDraft {
    pub id: String,
    pub business_id: String,
    pub service_id: String,
    pub staff_id: Option<String>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub created_at: NaiveDateTime,
}
