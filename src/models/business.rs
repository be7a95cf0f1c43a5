use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    /// IANA timezone name, e.g. "Europe/Berlin".
    pub timezone: String,
    /// When false, bookings are not tied to individual staff members and
    /// conflicts are checked business-wide.
    pub staff_scheduling: bool,
}

/// One stored schedule row. Weekday is 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone)]
pub struct BusinessHoursRow {
    pub weekday: u8,
    pub open_minute: u32,
    pub close_minute: u32,
    pub closed: bool,
}

/// The open/close window of a single day, in minutes from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub open_minute: u32,
    pub close_minute: u32,
}

impl DayWindow {
    pub fn open_time(&self) -> NaiveTime {
        minute_to_time(self.open_minute)
    }

    pub fn close_time(&self) -> NaiveTime {
        minute_to_time(self.close_minute)
    }
}

pub(crate) fn minute_to_time(minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
        .unwrap_or(NaiveTime::MIN)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub business_id: String,
    pub title: String,
    pub duration_minutes: i32,
    pub default_staff_id: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub business_id: String,
    pub display_name: String,
    /// External calendar this staff member's bookings mirror to, if any.
    pub calendar_ref: Option<String>,
}
