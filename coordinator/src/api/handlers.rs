//! The coordinator's message endpoint.
//!
//! Clients and workers POST typed JSON messages to `/api/message`; the
//! handler dispatches on the message tag. Handlers never wait for a
//! worker round trip: anything that needs one registers the pending unit
//! and returns.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::loader::{self, LoadStatus};
use crate::query;
use crate::state::AppState;
use protocol::{CoordinatorMessage, CoordinatorResponse};

/// Health check endpoint.
#[instrument]
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}

/// Landing page for browsers.
pub async fn landing_page() -> impl IntoResponse {
    axum::response::Html("<html><body>pipenet coordinator</body></html>")
}

/// Dispatch one inbound message.
#[instrument(skip(state, message))]
pub async fn handle_message(
    State(state): State<AppState>,
    Json(message): Json<CoordinatorMessage>,
) -> ApiResult<Json<CoordinatorResponse>> {
    let response = match message {
        CoordinatorMessage::WorkerJoined {
            address,
            free_memory_bytes,
        } => {
            state.workers.join(address, free_memory_bytes);
            CoordinatorResponse::Ack
        }

        CoordinatorMessage::ClientJoined {} => {
            let models = state.catalog.models()?;
            CoordinatorResponse::ClientJoined { models }
        }

        CoordinatorMessage::PollOpenModel { model_id, attempt } => {
            if attempt == 0 {
                info!(model_id = %model_id, "Open-model poll received");
            }
            let status = loader::request_load(&state, &model_id)?;
            CoordinatorResponse::PollOpenModel {
                ready: status == LoadStatus::Ready,
            }
        }

        CoordinatorMessage::StartSession {} => {
            let session_id = Uuid::new_v4();
            info!(session_id = %session_id, "Session started");
            CoordinatorResponse::StartSession { session_id }
        }

        CoordinatorMessage::QueryRequest {
            model_id,
            session_id,
            text,
            top_k,
            max_length,
        } => {
            let (query_id, input_tokens) =
                query::start_query(&state, &model_id, session_id, &text, top_k, max_length)?;
            CoordinatorResponse::Query {
                query_id,
                input_tokens,
            }
        }

        CoordinatorMessage::PollQueryResult { query_id, attempt } => {
            let poll = query::poll_result(&state, query_id, attempt)?;
            CoordinatorResponse::PollQueryResult {
                query_id,
                tokens: poll.tokens,
                text: poll.text,
                ready: poll.ready,
            }
        }

        CoordinatorMessage::ModelLoaded { model_id, task_id } => {
            loader::on_model_loaded(&state, &model_id, task_id)?;
            CoordinatorResponse::Ack
        }

        CoordinatorMessage::WorkResult { work_id, output } => {
            query::on_work_result(&state, work_id, output)?;
            CoordinatorResponse::Ack
        }
    };

    Ok(Json(response))
}
