pub mod appointment;
pub mod business;
pub mod conversation;
pub mod intent;
pub mod reply;

pub use appointment::{Appointment, AppointmentDraft, AppointmentStatus};
pub use business::{Business, BusinessHoursRow, DayWindow, Service, Staff};
pub use conversation::{AppointmentContext, ConversationRecord, DialogueMode};
pub use intent::{ClassifiedUtterance, IntentKind, RawSlots};
pub use reply::{ErrorKind, FlowReply, SlotKind};
