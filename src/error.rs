use thiserror::Error;

/// Errors surfaced by the recommendation engine.
///
/// Skip conditions (lock held, empty candidate pool) and empty ranking pages
/// are not errors and never appear here.
#[derive(Debug, Error)]
pub enum RecError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("batch worker pool error: {0}")]
    WorkerPool(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RecError>;
