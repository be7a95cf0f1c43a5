use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::CoreConfig;
use crate::services::calendar::CalendarSync;
use crate::services::clock::Clock;

/// Everything a turn needs, injected explicitly. The mutex guard around
/// the connection is scoped per database access and never held across an
/// await.
pub struct CoreState {
    pub db: Arc<Mutex<Connection>>,
    pub config: CoreConfig,
    pub clock: Box<dyn Clock>,
    /// `None` when the business runs without an external calendar mirror.
    pub calendar: Option<Box<dyn CalendarSync>>,
}
