use thiserror::Error;

/// Errors that can occur in the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// HTTP error talking to the coordinator
    #[error("HTTP error: {0}")]
    Http(String),

    /// Work arrived for a model this worker never loaded
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The hop input does not match the segment kind
    #[error("Invalid work input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;
