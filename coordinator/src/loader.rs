//! Model load coordination.
//!
//! Loading a model is asynchronous and triggered at most once per model
//! id: the first open-model poll claims the pending slot, plans the
//! partition, registers every load task, and dispatches one `LoadModel`
//! instruction per planned segment plus a tokenizer preparation task.
//! Worker acks drain the task set; the model flips to active when it
//! empties. Clients learn about readiness by polling, never by push.

use crate::cost;
use crate::dispatch;
use crate::error::{CoordinatorError, PlanningError, Result};
use crate::planner;
use crate::state::{AppState, ModelStatus};
use crate::tokenizer::CharTokenizer;
use protocol::{SegmentKind, WorkerMessage};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Outcome of a load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// All load tasks acked; the model serves queries
    Ready,
    /// Planned and dispatched (now or earlier); acks outstanding
    Loading,
}

/// Trigger the load of a model, or report on one already under way.
///
/// Safe to call concurrently for the same id: the pending-slot guard
/// collapses duplicate requests, so the planner runs exactly once.
#[instrument(skip(state))]
pub fn request_load(state: &AppState, model_id: &str) -> Result<LoadStatus> {
    match state.models.status(model_id) {
        ModelStatus::Active => return Ok(LoadStatus::Ready),
        ModelStatus::Pending => return Ok(LoadStatus::Loading),
        ModelStatus::Absent => {}
    }

    let workers = state.workers.snapshot();
    if workers.is_empty() {
        return Err(PlanningError::NoWorkers.into());
    }

    if !state.models.begin_load(model_id) {
        // Another request claimed the slot between the status check and
        // here; its plan is authoritative.
        return Ok(LoadStatus::Loading);
    }

    // From now on a failure must release the slot, or the model id would
    // be stuck pending forever.
    match plan_and_dispatch(state, model_id, &workers) {
        Ok(()) => Ok(LoadStatus::Loading),
        Err(e) => {
            state.models.abort_load(model_id);
            Err(e)
        }
    }
}

fn plan_and_dispatch(
    state: &AppState,
    model_id: &str,
    workers: &[crate::registry::WorkerInfo],
) -> Result<()> {
    let config = state.catalog.model_config(model_id)?;
    let costs = cost::costs_for(&config, state.cost_model.as_ref());
    let pipeline = planner::plan(workers, config.decoder_layer_count, &costs)?;
    planner::validate(&pipeline, config.decoder_layer_count)?;

    // One load task per segment that owns weights; the appended tail runs
    // on the head worker, whose weights arrive with the first segment.
    let load_segments: Vec<_> = pipeline
        .iter()
        .filter(|s| s.kind != SegmentKind::TailOnly)
        .cloned()
        .collect();
    let segment_tasks: Vec<Uuid> = load_segments.iter().map(|_| Uuid::new_v4()).collect();
    let tokenizer_task = Uuid::new_v4();

    // Register every task before dispatching anything, so no ack can
    // arrive for a task the registry has never seen.
    let mut task_ids = segment_tasks.clone();
    task_ids.push(tokenizer_task);
    state
        .models
        .install_plan(model_id, config.clone(), pipeline.clone(), task_ids);

    info!(
        model_id,
        segments = pipeline.len(),
        load_tasks = segment_tasks.len() + 1,
        "Model partition planned; dispatching load instructions"
    );

    for (segment, task_id) in load_segments.into_iter().zip(segment_tasks) {
        let worker = segment.worker.clone();
        let message = WorkerMessage::LoadModel {
            task_id,
            model_id: model_id.to_string(),
            config: config.clone(),
            segment,
        };
        dispatch::fire_and_forget(Arc::clone(&state.dispatcher), worker, message);
    }

    spawn_tokenizer_task(state, model_id, tokenizer_task, config.end_of_text_token);
    Ok(())
}

/// Prepare the model's tokenizer off the request path and complete its
/// load task, exactly like a worker ack does.
fn spawn_tokenizer_task(state: &AppState, model_id: &str, task_id: Uuid, eos: u32) {
    let models = Arc::clone(&state.models);
    let model_id = model_id.to_string();
    tokio::spawn(async move {
        let tokenizer = Arc::new(CharTokenizer::new(eos));
        models.set_tokenizer(&model_id, tokenizer);
        if models.complete_task(&model_id, task_id).is_none() {
            tracing::warn!(model_id = %model_id, "Tokenizer task completed for an unknown model");
        }
    });
}

/// Handle a worker's `ModelLoaded` ack.
pub fn on_model_loaded(state: &AppState, model_id: &str, task_id: Uuid) -> Result<()> {
    info!(model_id, task_id = %task_id, "Load task acked");
    match state.models.complete_task(model_id, task_id) {
        Some(_) => Ok(()),
        None => Err(CoordinatorError::UnknownLoadTask(task_id)),
    }
}
