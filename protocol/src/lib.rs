//! Shared wire types for pipenet.
//!
//! Everything that crosses the network between the coordinator and its
//! workers lives here: the model description, the decoder-block and
//! work-segment types produced by the partition planner, the per-hop
//! work inputs/outputs, and the JSON message envelopes themselves.
//!
//! The crate is deliberately free of networking and async code so that
//! both sides (and their tests) can depend on it without pulling in a
//! runtime.

pub mod message;
pub mod model;
pub mod segment;
pub mod work;

pub use message::{CoordinatorMessage, CoordinatorResponse, WorkerMessage, WorkerResponse};
pub use model::{BlockKind, MemorySizes, ModelCatalogFile, ModelConfig, ModelDescriptor};
pub use segment::{DecoderBlock, SegmentKind, WorkSegment, WorkerAddress};
pub use work::{Token, WorkInput, WorkOutput};
