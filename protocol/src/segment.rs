//! Work segments: the unit of pipeline assignment.
//!
//! The partition planner splits a model's decoder blocks into an ordered
//! list of [`WorkSegment`]s, each bound to one worker. The position of a
//! segment in that list is the hop order used at inference time.

use crate::model::BlockKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A worker's reachable base URL, e.g. `http://10.0.0.7:9000`.
///
/// The address is the worker's identity: a second join announcement from
/// the same address updates the existing entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerAddress(pub String);

impl WorkerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One attention or feed-forward sub-layer of one decoder layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecoderBlock {
    pub kind: BlockKind,
    pub layer_index: usize,
}

impl DecoderBlock {
    pub fn new(kind: BlockKind, layer_index: usize) -> Self {
        Self { kind, layer_index }
    }
}

/// What part of the transformer a segment executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// The whole model on a single worker
    Full,
    /// Only the embedding head
    HeadOnly,
    /// The embedding head plus one or more decoder blocks
    HeadAndLayers,
    /// Only decoder blocks
    LayersOnly,
    /// Only the output projection / sampling tail
    TailOnly,
}

impl SegmentKind {
    /// Segment starts from a raw token (runs the embedding head).
    pub fn has_head(self) -> bool {
        matches!(self, Self::Full | Self::HeadOnly | Self::HeadAndLayers)
    }

    /// Segment runs decoder blocks.
    pub fn has_layers(self) -> bool {
        matches!(self, Self::Full | Self::HeadAndLayers | Self::LayersOnly)
    }

    /// Segment ends in the output projection (can emit a token).
    pub fn has_tail(self) -> bool {
        matches!(self, Self::Full | Self::TailOnly)
    }
}

/// A contiguous run of decoder blocks (plus optionally the head or tail)
/// assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSegment {
    pub worker: WorkerAddress,
    pub kind: SegmentKind,
    pub blocks: Vec<DecoderBlock>,
}

impl WorkSegment {
    pub fn new(worker: WorkerAddress, kind: SegmentKind) -> Self {
        Self {
            worker,
            kind,
            blocks: Vec::new(),
        }
    }

    pub fn push_block(&mut self, block: DecoderBlock) {
        self.blocks.push(block);
    }
}
