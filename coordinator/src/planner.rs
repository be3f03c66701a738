//! Memory-aware partition planner.
//!
//! Turns a model description plus a snapshot of the worker pool into an
//! ordered pipeline of [`WorkSegment`]s. Workers are filled greedily in
//! descending free-memory order; a segment is closed and the next worker
//! opened as soon as the next decoder block no longer fits. The plan is
//! deterministic for a fixed worker snapshot and cost table.

use crate::error::PlanningError;
use crate::registry::WorkerInfo;
use protocol::{BlockKind, DecoderBlock, SegmentKind, WorkSegment};
use tracing::debug;

/// Multiplier applied to every cost estimate to absorb estimation error.
pub const SAFETY_MARGIN: f64 = 1.2;

/// Byte costs of the three block categories, before the safety margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCosts {
    /// Embedding head and output projection weights
    pub head_bytes: u64,
    /// One attention block
    pub attention_bytes: u64,
    /// One feed-forward block
    pub feed_forward_bytes: u64,
}

impl BlockCosts {
    fn scaled(&self) -> ScaledCosts {
        ScaledCosts {
            head: scale(self.head_bytes),
            attention: scale(self.attention_bytes),
            feed_forward: scale(self.feed_forward_bytes),
        }
    }
}

struct ScaledCosts {
    head: i64,
    attention: i64,
    feed_forward: i64,
}

fn scale(bytes: u64) -> i64 {
    (bytes as f64 * SAFETY_MARGIN).round() as i64
}

/// Produce the ordered pipeline for a model with `layer_count` decoder
/// layers over the given worker snapshot.
///
/// The first worker in descending free-memory order pays the head cost and
/// opens the first segment. Each layer contributes its attention block and
/// then its feed-forward block, in layer order; whenever the current
/// worker's remaining budget cannot cover the next block, the segment is
/// closed and the next unused worker takes over. Exhausting the pool is an
/// explicit [`PlanningError::WorkerPoolExhausted`].
///
/// If more than one segment was produced, a blockless `TailOnly` segment
/// on the first worker is appended; it executes the output projection, so
/// every multi-segment pipeline starts and ends on the same worker.
pub fn plan(
    workers: &[WorkerInfo],
    layer_count: usize,
    costs: &BlockCosts,
) -> Result<Vec<WorkSegment>, PlanningError> {
    if workers.is_empty() {
        return Err(PlanningError::NoWorkers);
    }

    // Descending free memory, address as the deterministic tie-breaker.
    let mut pool: Vec<&WorkerInfo> = workers.iter().collect();
    pool.sort_by(|a, b| {
        b.free_memory_bytes
            .cmp(&a.free_memory_bytes)
            .then_with(|| a.address.cmp(&b.address))
    });

    let costs = costs.scaled();
    let mut pool = pool.into_iter();

    // First worker carries the head.
    let first = pool.next().expect("pool is non-empty");
    let mut segments = vec![WorkSegment::new(first.address.clone(), SegmentKind::HeadOnly)];
    let mut budget = first.free_memory_bytes as i64 - costs.head;

    for layer_index in 0..layer_count {
        for (kind, cost) in [
            (BlockKind::Attention, costs.attention),
            (BlockKind::FeedForward, costs.feed_forward),
        ] {
            if budget < cost {
                let next = pool.next().ok_or(PlanningError::WorkerPoolExhausted {
                    kind: match kind {
                        BlockKind::Attention => "attention",
                        BlockKind::FeedForward => "feed-forward",
                    },
                    layer_index,
                    placed_segments: segments.len(),
                    required_bytes: cost as u64,
                })?;
                segments.push(WorkSegment::new(next.address.clone(), SegmentKind::LayersOnly));
                budget = next.free_memory_bytes as i64;
            }
            budget -= cost;
            segments
                .last_mut()
                .expect("at least one segment exists")
                .push_block(DecoderBlock::new(kind, layer_index));
        }
    }

    mark_segment_kinds(&mut segments);

    // Multi-segment pipelines close with the output projection back on the
    // first worker.
    if segments.len() > 1 {
        let head_worker = segments[0].worker.clone();
        segments.push(WorkSegment::new(head_worker, SegmentKind::TailOnly));
    }

    debug!(
        segments = segments.len(),
        layers = layer_count,
        "Partition plan complete"
    );

    Ok(segments)
}

fn mark_segment_kinds(segments: &mut [WorkSegment]) {
    if segments.len() == 1 {
        segments[0].kind = SegmentKind::Full;
        return;
    }

    segments[0].kind = if segments[0].blocks.is_empty() {
        SegmentKind::HeadOnly
    } else {
        SegmentKind::HeadAndLayers
    };
    for segment in &mut segments[1..] {
        segment.kind = SegmentKind::LayersOnly;
    }
}

/// Check a planned pipeline for completeness: every attention and
/// feed-forward block of every layer appears exactly once, in ascending
/// layer order with attention before feed-forward, and a multi-segment
/// pipeline ends with a blockless tail on the head worker.
pub fn validate(pipeline: &[WorkSegment], layer_count: usize) -> Result<(), PlanningError> {
    if pipeline.is_empty() {
        return Err(PlanningError::InvalidPipeline("pipeline is empty".into()));
    }

    let mut expected = Vec::with_capacity(layer_count * 2);
    for layer_index in 0..layer_count {
        expected.push(DecoderBlock::new(BlockKind::Attention, layer_index));
        expected.push(DecoderBlock::new(BlockKind::FeedForward, layer_index));
    }

    let placed: Vec<DecoderBlock> = pipeline
        .iter()
        .flat_map(|s| s.blocks.iter().copied())
        .collect();

    if placed != expected {
        return Err(PlanningError::InvalidPipeline(format!(
            "expected {} blocks in layer order, found {}",
            expected.len(),
            placed.len()
        )));
    }

    if pipeline.len() > 1 {
        let tail = pipeline.last().expect("pipeline is non-empty");
        if tail.kind != SegmentKind::TailOnly || !tail.blocks.is_empty() {
            return Err(PlanningError::InvalidPipeline(
                "multi-segment pipeline must end with a blockless tail".into(),
            ));
        }
        if tail.worker != pipeline[0].worker {
            return Err(PlanningError::InvalidPipeline(
                "tail segment must run on the head worker".into(),
            ));
        }
    }

    Ok(())
}
