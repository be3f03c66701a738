//! The worker's message endpoint.
//!
//! Both instruction kinds are acked immediately and executed on a spawned
//! task; the outcome travels back to the coordinator as a separate
//! message (`ModelLoaded` or `WorkResult`). The handler therefore never
//! blocks on segment execution.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};

use crate::executor::{self, MockBlockCompute};
use crate::state::{LoadedModel, WorkerState};
use protocol::{CoordinatorMessage, WorkerMessage, WorkerResponse};

/// Create the worker router.
pub fn create_router(state: WorkerState) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/health", get(health_check))
        .route("/api/message", post(handle_message))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}

async fn landing_page() -> impl IntoResponse {
    axum::response::Html("<html><body>pipenet worker</body></html>")
}

/// Dispatch one instruction from the coordinator.
#[instrument(skip(state, message))]
pub async fn handle_message(
    State(state): State<WorkerState>,
    Json(message): Json<WorkerMessage>,
) -> Json<WorkerResponse> {
    match message {
        WorkerMessage::LoadModel {
            task_id,
            model_id,
            config,
            segment,
        } => {
            info!(
                model_id = %model_id,
                task_id = %task_id,
                kind = ?segment.kind,
                blocks = segment.blocks.len(),
                "Load instruction received"
            );

            let state = state.clone();
            tokio::spawn(async move {
                // The mock compute stands in for reading the segment's
                // parameters; swapping in a real loader keeps this flow.
                let compute = Arc::new(MockBlockCompute::new(
                    config.hidden_size,
                    config.vocab_size,
                ));
                state.insert_model(
                    model_id.clone(),
                    LoadedModel {
                        config,
                        segment,
                        compute,
                    },
                );

                let ack = CoordinatorMessage::ModelLoaded { model_id, task_id };
                if let Err(e) = state.coordinator.send(&ack).await {
                    error!(error = %e, "Failed to report the loaded model");
                }
            });
        }

        WorkerMessage::Work {
            work_id,
            model_id,
            top_k,
            input_only,
            input,
            segment,
        } => {
            debug!(
                work_id = %work_id,
                model_id = %model_id,
                input_only,
                kind = ?segment.kind,
                "Work received"
            );

            let state = state.clone();
            tokio::spawn(async move {
                let Some(model) = state.model(&model_id) else {
                    error!(model_id = %model_id, work_id = %work_id, "Work for a model that is not loaded");
                    return;
                };

                match executor::execute_segment(
                    model.compute.as_ref(),
                    &model.config,
                    &segment,
                    &input,
                    input_only,
                    top_k,
                ) {
                    Ok(output) => {
                        let result = CoordinatorMessage::WorkResult { work_id, output };
                        if let Err(e) = state.coordinator.send(&result).await {
                            error!(work_id = %work_id, error = %e, "Failed to return the work result");
                        }
                    }
                    Err(e) => {
                        error!(work_id = %work_id, error = %e, "Segment execution failed");
                    }
                }
            });
        }
    }

    Json(WorkerResponse::Ack)
}
