use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("document body serialization failed: {0}")]
    Serialization(String),

    #[error("rejected remote timestamp {delta_ms}ms ahead of local clock (limit {max_ms}ms)")]
    HlcDriftTooLarge { delta_ms: u64, max_ms: u64 },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
