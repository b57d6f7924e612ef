use thiserror::Error;

/// Centralized error types for the application
///
/// Every fallible operation of the orchestration core converts into this enum.
/// Uses `thiserror` for automatic error conversion and display formatting.
///
/// # Example
///
/// ```no_run
/// use appealbot::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     log::error!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Key-value storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] redis::RedisError),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP status code errors
    #[error("HTTP request failed with status: {0}")]
    HttpStatus(reqwest::StatusCode),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// AMQP client errors
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The queue we attach to passively does not exist
    #[error("Queue '{0}' does not exist")]
    QueueMissing(String),

    /// Broker protocol errors (unrouted publish, closed stream, bad payload)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;
