use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the coordinator.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Missing or invalid model/tokenizer description
    #[error("Configuration error: {0}")]
    Config(String),

    /// The worker pool cannot hold the model
    #[error(transparent)]
    Planning(#[from] PlanningError),

    /// A message to a worker could not be delivered
    #[error("Transport error talking to {worker}: {detail}")]
    Transport { worker: String, detail: String },

    /// Poll or result for a query id we don't know
    #[error("Unknown query: {0}")]
    UnknownQuery(Uuid),

    /// Work result for a work id we don't know
    #[error("Unknown work unit: {0}")]
    UnknownWork(Uuid),

    /// Load ack for a task id we don't know
    #[error("Unknown load task: {0}")]
    UnknownLoadTask(Uuid),

    /// A work result that is impossible in the query's current state
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    /// IO error (reading model descriptions, tokenizer assets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the partition planner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("no workers have joined; cannot place any segment")]
    NoWorkers,

    #[error(
        "worker pool exhausted placing {kind} block of layer {layer_index}: \
         {placed_segments} segment(s) planned, {required_bytes} bytes still required"
    )]
    WorkerPoolExhausted {
        kind: &'static str,
        layer_index: usize,
        placed_segments: usize,
        required_bytes: u64,
    },

    #[error("planned pipeline is invalid: {0}")]
    InvalidPipeline(String),
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// API error surfaced to HTTP callers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::UnknownQuery(_)
            | CoordinatorError::UnknownWork(_)
            | CoordinatorError::UnknownLoadTask(_) => ApiError::NotFound(e.to_string()),
            CoordinatorError::Planning(_) | CoordinatorError::Config(_) => {
                ApiError::BadRequest(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Convert ApiError into an HTTP response.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "success": false,
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
