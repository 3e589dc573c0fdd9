/// Error types shared by the diagnosis service crates.
///
/// These represent failures in infrastructure components (Redis, record
/// serialization). Application errors are defined in the server crate and
/// wrap `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis unavailable, degrading gracefully")]
    RedisUnavailable,

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
