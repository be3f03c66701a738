//! Query lifecycle.
//!
//! A query lives in the pending registry from the moment a client submits
//! it until a stop condition moves it to the finished registry. Progress
//! is driven entirely by inbound `WorkResult` messages: each one resolves
//! the query's single in-flight work unit, runs the pure transition
//! function in [`crate::pipeline`], and dispatches the next hop (if any)
//! fire-and-forget.

use crate::dispatch;
use crate::error::{CoordinatorError, Result};
use crate::pipeline::{self, PassView, QueryPhase, Step};
use crate::state::AppState;
use crate::tokenizer::Tokenizer;
use protocol::{Token, WorkInput, WorkOutput, WorkSegment, WorkerAddress, WorkerMessage};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// One query's full progress.
pub struct QueryState {
    pub model_id: String,
    pub session_id: Uuid,
    pub query_id: Uuid,
    pub input_tokens: Vec<Token>,
    pub top_k: u32,
    pub max_length: usize,

    /// The model's planned pipeline (shared, immutable).
    pub pipeline: Arc<Vec<WorkSegment>>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub eos: u32,

    /// Index of the segment whose hop is in flight; resets to 0 whenever
    /// a new token position starts.
    pub segment_cursor: usize,
    pub processed_input_count: usize,
    pub generated_tokens: Vec<Token>,
    pub generated_text: String,
    pub phase: QueryPhase,
}

impl QueryState {
    fn input_ids(&self) -> Vec<u32> {
        self.input_tokens.iter().map(|t| t.id).collect()
    }

    /// Record a sampled token and refresh the running text.
    fn record_token(&mut self, token_id: u32) {
        let text = self.tokenizer.decode(&[token_id]);
        self.generated_tokens.push(Token::new(token_id, text));
        let ids: Vec<u32> = self.generated_tokens.iter().map(|t| t.id).collect();
        self.generated_text = self.tokenizer.decode(&ids);
    }
}

/// What a poll sees: everything generated so far, complete or not.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub ready: bool,
    pub tokens: Vec<Token>,
    pub text: String,
}

/// The next hop to send after a state transition.
#[derive(Debug)]
pub struct HopDispatch {
    pub query_id: Uuid,
    pub worker: WorkerAddress,
    pub model_id: String,
    pub top_k: u32,
    pub input_only: bool,
    pub input: WorkInput,
    pub segment: WorkSegment,
}

#[derive(Default)]
struct QueryMaps {
    pending: HashMap<Uuid, QueryState>,
    finished: HashMap<Uuid, QueryState>,
    /// In-flight hops: work id -> query id. At most one entry per query.
    work_units: HashMap<Uuid, Uuid>,
}

/// Registry of pending and finished queries plus in-flight work units.
#[derive(Default)]
pub struct QueryRegistry {
    inner: RwLock<QueryMaps>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pending(&self, query: QueryState) {
        let mut maps = self.inner.write().expect("query registry poisoned");
        maps.pending.insert(query.query_id, query);
    }

    /// Mark a hop as in flight. Must happen before the dispatch goes out.
    pub fn register_work(&self, work_id: Uuid, query_id: Uuid) {
        let mut maps = self.inner.write().expect("query registry poisoned");
        maps.work_units.insert(work_id, query_id);
    }

    /// Resolve and drop the in-flight marker for a hop.
    pub fn remove_work(&self, work_id: Uuid) -> Option<Uuid> {
        let mut maps = self.inner.write().expect("query registry poisoned");
        maps.work_units.remove(&work_id)
    }

    pub fn in_flight_count(&self) -> usize {
        let maps = self.inner.read().expect("query registry poisoned");
        maps.work_units.len()
    }

    pub fn poll(&self, query_id: Uuid) -> Option<PollResult> {
        let maps = self.inner.read().expect("query registry poisoned");
        if let Some(query) = maps.finished.get(&query_id) {
            return Some(PollResult {
                ready: true,
                tokens: query.generated_tokens.clone(),
                text: query.generated_text.clone(),
            });
        }
        maps.pending.get(&query_id).map(|query| PollResult {
            ready: false,
            tokens: query.generated_tokens.clone(),
            text: query.generated_text.clone(),
        })
    }

    /// Run the transition function for one completed hop and apply the
    /// resulting step. Returns the next hop to dispatch, or `None` when
    /// the query just finished.
    pub fn apply_result(
        &self,
        query_id: Uuid,
        output: &WorkOutput,
    ) -> Result<Option<HopDispatch>> {
        let mut maps = self.inner.write().expect("query registry poisoned");
        let query = maps
            .pending
            .get_mut(&query_id)
            .ok_or(CoordinatorError::UnknownQuery(query_id))?;

        let input_ids = query.input_ids();
        let view = PassView {
            pipeline: &query.pipeline,
            segment_cursor: query.segment_cursor,
            phase: query.phase,
            input_tokens: &input_ids,
            processed_input_count: query.processed_input_count,
            generated_len: query.generated_tokens.len(),
            max_length: query.max_length,
            eos: query.eos,
        };
        let step = pipeline::advance(view, output)?;
        debug!(query_id = %query_id, step = ?step, "Advancing query");

        match step {
            Step::Forward { segment_index } => {
                let WorkOutput::HiddenState { values } = output else {
                    unreachable!("advance() only forwards hidden states");
                };
                query.segment_cursor = segment_index;
                Ok(Some(hop(query, WorkInput::HiddenState {
                    values: values.clone(),
                })))
            }
            Step::NextInputToken { token, position } => {
                query.processed_input_count += 1;
                query.segment_cursor = 0;
                Ok(Some(hop(query, WorkInput::Token { position, token })))
            }
            Step::StartGeneration { token, position } => {
                query.processed_input_count += 1;
                query.phase = QueryPhase::Generating;
                query.segment_cursor = 0;
                Ok(Some(hop(query, WorkInput::Token { position, token })))
            }
            Step::Continue { token, position } => {
                query.record_token(token);
                query.segment_cursor = 0;
                Ok(Some(hop(query, WorkInput::Token { position, token })))
            }
            Step::Finish { token } => {
                query.record_token(token);
                query.phase = QueryPhase::Finished;
                let query = maps
                    .pending
                    .remove(&query_id)
                    .expect("pending entry checked above");
                info!(
                    query_id = %query_id,
                    generated = query.generated_tokens.len(),
                    "Query finished"
                );
                maps.finished.insert(query_id, query);
                Ok(None)
            }
        }
    }
}

fn hop(query: &QueryState, input: WorkInput) -> HopDispatch {
    let segment = query.pipeline[query.segment_cursor].clone();
    HopDispatch {
        query_id: query.query_id,
        worker: segment.worker.clone(),
        model_id: query.model_id.clone(),
        top_k: query.top_k,
        input_only: query.phase == QueryPhase::ReplayingInput,
        input,
        segment,
    }
}

/// Accept a new query: tokenize, register, and dispatch the first hop.
/// Returns immediately with the query id and the tokenized input;
/// generation continues via work results.
pub fn start_query(
    state: &AppState,
    model_id: &str,
    session_id: Uuid,
    text: &str,
    top_k: u32,
    max_length: usize,
) -> Result<(Uuid, Vec<Token>)> {
    let model = state.models.active(model_id).ok_or_else(|| {
        CoordinatorError::Config(format!("model {model_id} is not loaded; open it first"))
    })?;

    let mut input_tokens = model.tokenizer.encode(text);
    if input_tokens.is_empty() {
        input_tokens.push(model.tokenizer.eos());
    }

    let query_id = Uuid::new_v4();
    let phase = if input_tokens.len() > 1 {
        QueryPhase::ReplayingInput
    } else {
        QueryPhase::Generating
    };
    let first_token = input_tokens[0].id;

    info!(
        query_id = %query_id,
        model_id,
        input_tokens = input_tokens.len(),
        max_length,
        "Query started"
    );

    let query = QueryState {
        model_id: model_id.to_string(),
        session_id,
        query_id,
        input_tokens: input_tokens.clone(),
        top_k,
        max_length,
        pipeline: Arc::clone(&model.pipeline),
        tokenizer: Arc::clone(&model.tokenizer),
        eos: model.config.end_of_text_token,
        segment_cursor: 0,
        processed_input_count: 0,
        generated_tokens: Vec::new(),
        generated_text: String::new(),
        phase,
    };

    let first_hop = hop(&query, WorkInput::Token {
        position: 0,
        token: first_token,
    });
    state.queries.insert_pending(query);
    dispatch_hop(state, first_hop);

    Ok((query_id, input_tokens))
}

/// Handle one completed hop.
pub fn on_work_result(state: &AppState, work_id: Uuid, output: WorkOutput) -> Result<()> {
    let query_id = state
        .queries
        .remove_work(work_id)
        .ok_or(CoordinatorError::UnknownWork(work_id))?;

    match state.queries.apply_result(query_id, &output)? {
        Some(next) => dispatch_hop(state, next),
        None => {} // finished; the client picks it up by polling
    }
    Ok(())
}

/// Register the work unit and send the hop without blocking the caller.
fn dispatch_hop(state: &AppState, hop: HopDispatch) {
    let work_id = Uuid::new_v4();
    state.queries.register_work(work_id, hop.query_id);

    let message = WorkerMessage::Work {
        work_id,
        model_id: hop.model_id,
        top_k: hop.top_k,
        input_only: hop.input_only,
        input: hop.input,
        segment: hop.segment,
    };
    dispatch::fire_and_forget(Arc::clone(&state.dispatcher), hop.worker, message);
}

/// Answer a result poll.
pub fn poll_result(state: &AppState, query_id: Uuid, attempt: u32) -> Result<PollResult> {
    if attempt == 0 {
        info!(query_id = %query_id, "Result poll received");
    }
    state
        .queries
        .poll(query_id)
        .ok_or(CoordinatorError::UnknownQuery(query_id))
}
