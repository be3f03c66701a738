//! Pipeline execution state machine.
//!
//! [`advance`] is a pure transition function: given a snapshot of one
//! query's progress and the output of the hop that just completed, it
//! decides what happens next. No networking, no registries, no clocks;
//! the query lifecycle manager applies the returned [`Step`] and performs
//! the dispatching. This keeps every branch of the per-token walk
//! unit-testable in isolation.
//!
//! Per position, a query walks the pipeline left to right
//! (`segment_cursor` 0..len). Between segments the hidden state is
//! forwarded. At the end of a pass the result is either an input-priming
//! acknowledgement (`Empty`) or a sampled token; the token either
//! terminates the query or seeds the next position.

use protocol::{SegmentKind, WorkOutput, WorkSegment};
use thiserror::Error;

/// Where a query is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    /// Input tokens are being replayed to prime attention state; no
    /// sampling happens.
    ReplayingInput,
    /// Every completed pass samples one new token.
    Generating,
    /// A stop condition was met; no further hops.
    Finished,
}

/// Snapshot of one query's progress, as seen by the transition function.
#[derive(Debug, Clone, Copy)]
pub struct PassView<'a> {
    pub pipeline: &'a [WorkSegment],
    pub segment_cursor: usize,
    pub phase: QueryPhase,
    /// Ids of the prompt tokens.
    pub input_tokens: &'a [u32],
    pub processed_input_count: usize,
    pub generated_len: usize,
    pub max_length: usize,
    pub eos: u32,
}

/// The action to apply after one completed hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Forward the hidden state to `pipeline[segment_index]`.
    Forward { segment_index: usize },

    /// Input priming continues: dispatch `token` at `position` from the
    /// first segment, still input-only.
    NextInputToken { token: u32, position: usize },

    /// The last input token goes in with sampling enabled; the query
    /// moves to `Generating`.
    StartGeneration { token: u32, position: usize },

    /// Record `token`, then feed it back at `position` for the next one.
    Continue { token: u32, position: usize },

    /// Record `token` and finish the query.
    Finish { token: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("expected a hidden state between segments, got {got}")]
    ExpectedHiddenState { got: &'static str },

    #[error("unexpected {got} output at the end of a pass in phase {phase:?}")]
    UnexpectedOutput { got: &'static str, phase: QueryPhase },

    #[error("work result for a finished query")]
    AlreadyFinished,
}

fn output_name(output: &WorkOutput) -> &'static str {
    match output {
        WorkOutput::Empty => "empty",
        WorkOutput::HiddenState { .. } => "hidden-state",
        WorkOutput::Token { .. } => "token",
    }
}

/// Decide the next action after the hop at `view.segment_cursor` returned
/// `output`.
pub fn advance(view: PassView<'_>, output: &WorkOutput) -> Result<Step, PipelineError> {
    if view.phase == QueryPhase::Finished {
        return Err(PipelineError::AlreadyFinished);
    }

    if let Some(next_index) = next_segment(&view) {
        // Mid-pass: the previous output must be a hidden state.
        if !matches!(output, WorkOutput::HiddenState { .. }) {
            return Err(PipelineError::ExpectedHiddenState {
                got: output_name(output),
            });
        }
        return Ok(Step::Forward {
            segment_index: next_index,
        });
    }

    // The pass for this position is complete.
    match output {
        WorkOutput::Empty if view.phase == QueryPhase::ReplayingInput => {
            let processed = view.processed_input_count + 1;
            let token = view.input_tokens[processed];
            let position = processed + view.generated_len;
            if processed < view.input_tokens.len() - 1 {
                Ok(Step::NextInputToken { token, position })
            } else {
                Ok(Step::StartGeneration { token, position })
            }
        }
        WorkOutput::Token { token } => {
            let token = *token;
            if token == view.eos || view.generated_len + 1 >= view.max_length {
                Ok(Step::Finish { token })
            } else {
                let position = view.processed_input_count + view.generated_len + 1;
                Ok(Step::Continue { token, position })
            }
        }
        other => Err(PipelineError::UnexpectedOutput {
            got: output_name(other),
            phase: view.phase,
        }),
    }
}

/// The index of the segment the hidden state should be forwarded to, or
/// `None` when the current pass is done.
///
/// A trailing `TailOnly` segment is skipped while the query is replaying
/// input: its sampled token would be discarded, so the hop is never made.
fn next_segment(view: &PassView<'_>) -> Option<usize> {
    let next = view.segment_cursor + 1;
    let segment = view.pipeline.get(next)?;
    if segment.kind == SegmentKind::TailOnly && view.phase == QueryPhase::ReplayingInput {
        return None;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{WorkSegment, WorkerAddress};

    fn segment(kind: SegmentKind) -> WorkSegment {
        WorkSegment::new(WorkerAddress::new("http://w:9000"), kind)
    }

    fn three_segment_pipeline() -> Vec<WorkSegment> {
        vec![
            segment(SegmentKind::HeadAndLayers),
            segment(SegmentKind::LayersOnly),
            segment(SegmentKind::TailOnly),
        ]
    }

    fn view<'a>(
        pipeline: &'a [WorkSegment],
        cursor: usize,
        phase: QueryPhase,
        input_tokens: &'a [u32],
        processed: usize,
        generated: usize,
    ) -> PassView<'a> {
        PassView {
            pipeline,
            segment_cursor: cursor,
            phase,
            input_tokens,
            processed_input_count: processed,
            generated_len: generated,
            max_length: 10,
            eos: 0,
        }
    }

    fn hidden() -> WorkOutput {
        WorkOutput::HiddenState { values: vec![1.0] }
    }

    #[test]
    fn forwards_hidden_state_mid_pass() {
        let pipeline = three_segment_pipeline();
        let v = view(&pipeline, 0, QueryPhase::Generating, &[5], 1, 0);
        assert_eq!(
            advance(v, &hidden()).unwrap(),
            Step::Forward { segment_index: 1 }
        );
    }

    #[test]
    fn skips_tail_during_input_replay() {
        let pipeline = three_segment_pipeline();
        // Cursor 1 of 3: next would be the tail, but the query is still
        // replaying input, so the pass ends here.
        let input = [5, 6, 7];
        let v = view(&pipeline, 1, QueryPhase::ReplayingInput, &input, 0, 0);
        assert_eq!(
            advance(v, &WorkOutput::Empty).unwrap(),
            Step::NextInputToken {
                token: 6,
                position: 1
            }
        );
    }

    #[test]
    fn tail_runs_once_generation_starts() {
        let pipeline = three_segment_pipeline();
        let v = view(&pipeline, 1, QueryPhase::Generating, &[5], 0, 0);
        assert_eq!(
            advance(v, &hidden()).unwrap(),
            Step::Forward { segment_index: 2 }
        );
    }

    #[test]
    fn last_input_token_enables_generation() {
        let pipeline = three_segment_pipeline();
        let input = [5, 6, 7];
        // Second-to-last input token just finished its pass.
        let v = view(&pipeline, 1, QueryPhase::ReplayingInput, &input, 1, 0);
        assert_eq!(
            advance(v, &WorkOutput::Empty).unwrap(),
            Step::StartGeneration {
                token: 7,
                position: 2
            }
        );
    }

    #[test]
    fn four_token_input_replays_three_positions() {
        // Positions 0..2 are replayed input-only; the 4th token starts
        // generation.
        let pipeline = three_segment_pipeline();
        let input = [10, 11, 12, 13];
        let mut processed = 0;
        let mut steps = Vec::new();
        loop {
            let v = view(
                &pipeline,
                1, // tail is skipped during replay, so passes end at cursor 1
                QueryPhase::ReplayingInput,
                &input,
                processed,
                0,
            );
            let step = advance(v, &WorkOutput::Empty).unwrap();
            steps.push(step.clone());
            match step {
                Step::NextInputToken { .. } => processed += 1,
                Step::StartGeneration { token, position } => {
                    assert_eq!(token, 13);
                    assert_eq!(position, 3);
                    break;
                }
                other => panic!("unexpected step {other:?}"),
            }
        }
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn generated_token_feeds_the_next_position() {
        let pipeline = three_segment_pipeline();
        let input = [5, 6];
        let v = view(&pipeline, 2, QueryPhase::Generating, &input, 2, 0);
        assert_eq!(
            advance(v, &WorkOutput::Token { token: 42 }).unwrap(),
            Step::Continue {
                token: 42,
                position: 3
            }
        );
    }

    #[test]
    fn eos_finishes_the_query() {
        let pipeline = three_segment_pipeline();
        let v = view(&pipeline, 2, QueryPhase::Generating, &[5], 1, 3);
        assert_eq!(
            advance(v, &WorkOutput::Token { token: 0 }).unwrap(),
            Step::Finish { token: 0 }
        );
    }

    #[test]
    fn max_length_three_generates_exactly_three() {
        // A token stream that never hits EOS: the third recorded token
        // must finish the query.
        let pipeline = vec![segment(SegmentKind::Full)];
        let input = [5];
        let mut generated = 0;
        let mut finished = false;
        while !finished {
            let v = PassView {
                pipeline: &pipeline,
                segment_cursor: 0,
                phase: QueryPhase::Generating,
                input_tokens: &input,
                processed_input_count: 1,
                generated_len: generated,
                max_length: 3,
                eos: 0,
            };
            match advance(v, &WorkOutput::Token { token: 42 }).unwrap() {
                Step::Continue { .. } => generated += 1,
                Step::Finish { .. } => {
                    generated += 1;
                    finished = true;
                }
                other => panic!("unexpected step {other:?}"),
            }
        }
        assert_eq!(generated, 3);
    }

    #[test]
    fn cursor_is_monotonic_within_a_position() {
        // Walk one full generation pass over a three-segment pipeline:
        // each Forward step targets exactly the next segment, and only
        // the end-of-pass step asks for a new position (cursor reset).
        let pipeline = three_segment_pipeline();
        let input = [5];
        let mut cursor = 0;
        loop {
            let v = view(&pipeline, cursor, QueryPhase::Generating, &input, 1, 0);
            let output = if cursor + 1 < pipeline.len() {
                hidden()
            } else {
                WorkOutput::Token { token: 9 }
            };
            match advance(v, &output).unwrap() {
                Step::Forward { segment_index } => {
                    assert_eq!(segment_index, cursor + 1);
                    cursor = segment_index;
                }
                Step::Continue { position, .. } => {
                    // Position advances exactly when the pass completes.
                    assert_eq!(cursor, pipeline.len() - 1);
                    assert_eq!(position, 2);
                    break;
                }
                other => panic!("unexpected step {other:?}"),
            }
        }
    }

    #[test]
    fn token_before_pipeline_end_is_rejected() {
        let pipeline = three_segment_pipeline();
        let v = view(&pipeline, 0, QueryPhase::Generating, &[5], 1, 0);
        assert_eq!(
            advance(v, &WorkOutput::Token { token: 1 }),
            Err(PipelineError::ExpectedHiddenState { got: "token" })
        );
    }

    #[test]
    fn empty_output_while_generating_is_rejected() {
        let pipeline = vec![segment(SegmentKind::Full)];
        let v = view(&pipeline, 0, QueryPhase::Generating, &[5], 1, 0);
        assert!(matches!(
            advance(v, &WorkOutput::Empty),
            Err(PipelineError::UnexpectedOutput { got: "empty", .. })
        ));
    }

    #[test]
    fn finished_query_rejects_results() {
        let pipeline = vec![segment(SegmentKind::Full)];
        let v = view(&pipeline, 0, QueryPhase::Finished, &[5], 1, 1);
        assert_eq!(
            advance(v, &WorkOutput::Token { token: 1 }),
            Err(PipelineError::AlreadyFinished)
        );
    }
}
