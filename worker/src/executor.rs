//! Segment execution.
//!
//! [`execute_segment`] walks one hop: run the embedding head if the
//! segment has one, apply its decoder blocks in order, and project a
//! token if the segment ends in the tail and sampling is enabled. The
//! actual tensor math lives behind [`BlockCompute`]; the in-tree
//! [`MockBlockCompute`] is a deterministic stand-in with the same shape,
//! so the whole relay protocol can be exercised without model weights.

use crate::error::{Result, WorkerError};
use protocol::{BlockKind, DecoderBlock, ModelConfig, SegmentKind, WorkInput, WorkOutput, WorkSegment};

/// The compute contract a segment execution needs.
pub trait BlockCompute: Send + Sync {
    /// Embed one token at one position into a hidden state.
    fn embed(&self, position: usize, token: u32) -> Vec<f32>;

    /// Run one decoder block over the hidden state. During input replay
    /// (`input_only`) the block only has to update its attention state.
    fn apply_block(&self, block: &DecoderBlock, hidden: Vec<f32>, input_only: bool) -> Vec<f32>;

    /// Project the hidden state to the next token.
    fn project(&self, hidden: &[f32], top_k: u32) -> u32;
}

/// Execute one hop of one query.
///
/// During input replay the pass produces no sampled token; the segment
/// that closes the replay pass answers `Empty`. That is the tail-bearing
/// segment of a single-segment pipeline, or the one holding the model's
/// final decoder block otherwise (the tail hop is skipped while
/// replaying, so this segment is where the pass ends).
pub fn execute_segment(
    compute: &dyn BlockCompute,
    config: &ModelConfig,
    segment: &WorkSegment,
    input: &WorkInput,
    input_only: bool,
    top_k: u32,
) -> Result<WorkOutput> {
    let kind = segment.kind;

    let mut hidden = match (input, kind.has_head()) {
        (WorkInput::Token { position, token }, true) => compute.embed(*position, *token),
        (WorkInput::HiddenState { values }, false) => values.clone(),
        (WorkInput::Token { .. }, false) => {
            return Err(WorkerError::InvalidInput(format!(
                "{kind:?} segment expects a hidden state, got a token"
            )))
        }
        (WorkInput::HiddenState { .. }, true) => {
            return Err(WorkerError::InvalidInput(format!(
                "{kind:?} segment expects a token, got a hidden state"
            )))
        }
    };

    if kind.has_layers() {
        for block in &segment.blocks {
            hidden = compute.apply_block(block, hidden, input_only);
        }
    }

    if kind.has_tail() {
        if input_only {
            // Priming pass: the sampled token would be discarded.
            return Ok(WorkOutput::Empty);
        }
        let token = compute.project(&hidden, top_k);
        return Ok(WorkOutput::Token { token });
    }

    if input_only && holds_final_block(segment, config) {
        // The replay pass ends here; only the attention state mattered.
        return Ok(WorkOutput::Empty);
    }

    Ok(WorkOutput::HiddenState { values: hidden })
}

fn holds_final_block(segment: &WorkSegment, config: &ModelConfig) -> bool {
    segment.blocks.iter().any(|b| {
        b.kind == BlockKind::FeedForward && b.layer_index + 1 == config.decoder_layer_count
    })
}

/// Deterministic stand-in for the real transformer math.
///
/// Hidden states are a pure function of (token, position); block
/// application folds the layer index in; projection folds the hidden
/// state into a vocabulary slot. Identical inputs always produce
/// identical tokens, which is what the protocol tests need.
pub struct MockBlockCompute {
    hidden_size: usize,
    vocab_size: u32,
}

impl MockBlockCompute {
    pub fn new(hidden_size: usize, vocab_size: u32) -> Self {
        Self {
            hidden_size,
            vocab_size,
        }
    }
}

impl BlockCompute for MockBlockCompute {
    fn embed(&self, position: usize, token: u32) -> Vec<f32> {
        (0..self.hidden_size)
            .map(|i| ((token as usize + position + i) % 997) as f32 / 997.0)
            .collect()
    }

    fn apply_block(&self, block: &DecoderBlock, hidden: Vec<f32>, _input_only: bool) -> Vec<f32> {
        let shift = block.layer_index as f32 + 1.0;
        hidden
            .into_iter()
            .map(|v| (v * 0.97 + shift * 0.001) % 1.0)
            .collect()
    }

    fn project(&self, hidden: &[f32], _top_k: u32) -> u32 {
        let sum: f32 = hidden.iter().sum();
        (sum.abs() * 1000.0) as u32 % self.vocab_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::WorkerAddress;

    fn compute() -> MockBlockCompute {
        MockBlockCompute::new(8, 256)
    }

    /// Four decoder layers; tests place subsets of them per segment.
    fn config() -> ModelConfig {
        ModelConfig {
            decoder_layer_count: 4,
            hidden_size: 8,
            vocab_size: 256,
            end_of_text_token: 0,
            memory_sizes: None,
        }
    }

    fn segment(kind: SegmentKind, layers: &[usize]) -> WorkSegment {
        let mut segment = WorkSegment::new(WorkerAddress::new("http://w:9000"), kind);
        for &layer_index in layers {
            segment.push_block(DecoderBlock::new(BlockKind::Attention, layer_index));
            segment.push_block(DecoderBlock::new(BlockKind::FeedForward, layer_index));
        }
        segment
    }

    fn token_input() -> WorkInput {
        WorkInput::Token {
            position: 0,
            token: 42,
        }
    }

    #[test]
    fn full_segment_samples_a_token_when_generating() {
        let seg = segment(SegmentKind::Full, &[0, 1, 2, 3]);
        let output = execute_segment(&compute(), &config(), &seg, &token_input(), false, 40).unwrap();
        assert!(matches!(output, WorkOutput::Token { .. }));
    }

    #[test]
    fn full_segment_is_empty_during_replay() {
        let seg = segment(SegmentKind::Full, &[0, 1, 2, 3]);
        let output = execute_segment(&compute(), &config(), &seg, &token_input(), true, 40).unwrap();
        assert_eq!(output, WorkOutput::Empty);
    }

    #[test]
    fn head_segment_emits_hidden_state() {
        let seg = segment(SegmentKind::HeadAndLayers, &[0]);
        let output = execute_segment(&compute(), &config(), &seg, &token_input(), true, 40).unwrap();
        match output {
            WorkOutput::HiddenState { values } => assert_eq!(values.len(), 8),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn layers_segment_transforms_hidden_state() {
        let input = WorkInput::HiddenState {
            values: vec![0.5; 8],
        };
        let seg = segment(SegmentKind::LayersOnly, &[1, 2]);
        let output = execute_segment(&compute(), &config(), &seg, &input, false, 40).unwrap();
        match output {
            WorkOutput::HiddenState { values } => {
                assert_eq!(values.len(), 8);
                assert_ne!(values, vec![0.5; 8]);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn final_block_holder_closes_the_replay_pass() {
        // Layers 2..3 include the model's last feed-forward block, so a
        // replay pass ends here with nothing to forward.
        let input = WorkInput::HiddenState {
            values: vec![0.5; 8],
        };
        let seg = segment(SegmentKind::LayersOnly, &[2, 3]);
        let output = execute_segment(&compute(), &config(), &seg, &input, true, 40).unwrap();
        assert_eq!(output, WorkOutput::Empty);

        // Once generation is enabled the hidden state flows on (the tail
        // still needs it).
        let output = execute_segment(&compute(), &config(), &seg, &input, false, 40).unwrap();
        assert!(matches!(output, WorkOutput::HiddenState { .. }));
    }

    #[test]
    fn tail_segment_projects_from_hidden_state() {
        let input = WorkInput::HiddenState {
            values: vec![0.5; 8],
        };
        let seg = segment(SegmentKind::TailOnly, &[]);
        let output = execute_segment(&compute(), &config(), &seg, &input, false, 40).unwrap();
        assert!(matches!(output, WorkOutput::Token { .. }));
    }

    #[test]
    fn mismatched_input_is_rejected() {
        let hidden_input = WorkInput::HiddenState {
            values: vec![0.5; 8],
        };
        let full = segment(SegmentKind::Full, &[0, 1, 2, 3]);
        assert!(execute_segment(&compute(), &config(), &full, &hidden_input, false, 40).is_err());

        let layers = segment(SegmentKind::LayersOnly, &[0]);
        assert!(execute_segment(&compute(), &config(), &layers, &token_input(), false, 40).is_err());
    }

    #[test]
    fn mock_compute_is_deterministic() {
        let c = compute();
        let seg = segment(SegmentKind::Full, &[0, 1, 2, 3]);
        let a = execute_segment(&c, &config(), &seg, &token_input(), false, 40).unwrap();
        let b = execute_segment(&c, &config(), &seg, &token_input(), false, 40).unwrap();
        assert_eq!(a, b);
    }
}
