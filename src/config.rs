use std::env;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Candidate step for availability search, in minutes.
    pub slot_step_minutes: u32,
    /// Maximum number of alternative times offered in a clarifying question.
    pub max_suggestions: usize,
    /// Fallback appointment length when no service duration applies.
    pub default_duration_minutes: i32,
    /// Idle minutes before a conversation session is considered abandoned.
    pub session_ttl_minutes: i64,
    /// Base URL of the external calendar mirror; empty disables sync.
    pub calendar_url: String,
    pub calendar_token: String,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        Self {
            slot_step_minutes: env::var("SLOT_STEP_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            max_suggestions: env::var("MAX_SUGGESTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            default_duration_minutes: env::var("DEFAULT_DURATION_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            session_ttl_minutes: env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            calendar_url: env::var("CALENDAR_URL").unwrap_or_default(),
            calendar_token: env::var("CALENDAR_TOKEN").unwrap_or_default(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            slot_step_minutes: 15,
            max_suggestions: 5,
            default_duration_minutes: 60,
            session_ttl_minutes: 30,
            calendar_url: String::new(),
            calendar_token: String::new(),
        }
    }
}
