use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    CreateAppointment,
    AppointmentConfirm,
    CancelAppointment,
    RescheduleAppointment,
    AppointmentInfo,
    Availability,
    StaffAvailability,
    /// Anything the scheduling core does not own (FAQ, small talk, handoff).
    #[serde(other)]
    Other,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::CreateAppointment => "create_appointment",
            IntentKind::AppointmentConfirm => "appointment_confirm",
            IntentKind::CancelAppointment => "cancel_appointment",
            IntentKind::RescheduleAppointment => "reschedule_appointment",
            IntentKind::AppointmentInfo => "appointment_info",
            IntentKind::Availability => "availability",
            IntentKind::StaffAvailability => "staff_availability",
            IntentKind::Other => "other",
        }
    }
}

/// Slot candidates exactly as the classifier produced them. Untrusted:
/// every field goes through the normalizer before it reaches the context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSlots {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub staff: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub window_start: Option<String>,
    #[serde(default)]
    pub window_end: Option<String>,
}

/// One classified utterance as delivered by the external intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedUtterance {
    pub intent: IntentKind,
    #[serde(default)]
    pub slots: RawSlots,
    #[serde(default)]
    pub confidence: f32,
}
