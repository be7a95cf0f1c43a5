#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("unknown business: {0}")]
    UnknownBusiness(String),

    #[error("draft not found: {0}")]
    DraftNotFound(String),

    #[error("time slot no longer available")]
    SlotTaken,

    #[error("outside business hours")]
    OutsideHours,
}
