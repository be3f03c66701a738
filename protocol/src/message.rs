//! The JSON message surface.
//!
//! Both roles expose a single POST endpoint (`/api/message`) and dispatch
//! on an internally-tagged envelope. [`CoordinatorMessage`] covers
//! everything a client or worker sends to the coordinator;
//! [`WorkerMessage`] covers what the coordinator sends to a worker.

use crate::model::{ModelCatalogFile, ModelConfig};
use crate::segment::{WorkSegment, WorkerAddress};
use crate::work::{Token, WorkInput, WorkOutput};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages accepted by the coordinator's message endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// A worker announces itself (or refreshes its free memory)
    WorkerJoined {
        address: WorkerAddress,
        free_memory_bytes: u64,
    },

    /// A client connects and wants the model catalog
    ClientJoined {},

    /// Trigger (once) and poll the loading of a model
    PollOpenModel { model_id: String, attempt: u32 },

    /// Open a new session
    StartSession {},

    /// Start generating for a prompt
    QueryRequest {
        model_id: String,
        session_id: Uuid,
        text: String,
        top_k: u32,
        max_length: usize,
    },

    /// Poll a running or finished query
    PollQueryResult { query_id: Uuid, attempt: u32 },

    /// A worker acks one load task
    ModelLoaded { model_id: String, task_id: Uuid },

    /// A worker returns the output of one hop
    WorkResult { work_id: Uuid, output: WorkOutput },
}

/// Messages the coordinator sends to a worker's message endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Load the blocks of one work segment
    LoadModel {
        task_id: Uuid,
        model_id: String,
        config: ModelConfig,
        segment: WorkSegment,
    },

    /// Execute one hop of one query
    Work {
        work_id: Uuid,
        model_id: String,
        top_k: u32,
        /// True while the query is still replaying its prompt; a
        /// tail-bearing segment must not sample a token then.
        input_only: bool,
        input: WorkInput,
        segment: WorkSegment,
    },
}

/// Responses returned by a worker's message endpoint. Workers always ack
/// immediately; results travel back as separate [`CoordinatorMessage`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Ack,
}

/// Responses returned by the coordinator's message endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorResponse {
    /// Plain acknowledgement (worker-originated messages)
    Ack,

    /// Catalog for a joining client
    ClientJoined { models: ModelCatalogFile },

    /// Whether the polled model is ready to serve queries
    PollOpenModel { ready: bool },

    /// A fresh session id
    StartSession { session_id: Uuid },

    /// The query was accepted; generation continues asynchronously
    Query {
        query_id: Uuid,
        input_tokens: Vec<Token>,
    },

    /// Tokens generated so far (all of them once `ready`)
    PollQueryResult {
        query_id: Uuid,
        tokens: Vec<Token>,
        text: String,
        ready: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_message_roundtrip() {
        let msg = CoordinatorMessage::WorkerJoined {
            address: WorkerAddress::new("http://127.0.0.1:9000"),
            free_memory_bytes: 4_000_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"worker_joined\""));

        let parsed: CoordinatorMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            CoordinatorMessage::WorkerJoined {
                address,
                free_memory_bytes,
            } => {
                assert_eq!(address.as_str(), "http://127.0.0.1:9000");
                assert_eq!(free_memory_bytes, 4_000_000);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn work_message_carries_input_only_flag() {
        let msg = WorkerMessage::Work {
            work_id: Uuid::new_v4(),
            model_id: "gpt2-small".into(),
            top_k: 40,
            input_only: true,
            input: WorkInput::Token {
                position: 0,
                token: 11,
            },
            segment: WorkSegment::new(
                WorkerAddress::new("http://127.0.0.1:9000"),
                crate::segment::SegmentKind::Full,
            ),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: WorkerMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            WorkerMessage::Work { input_only, .. } => assert!(input_only),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn response_tags_are_stable() {
        let json = serde_json::to_string(&CoordinatorResponse::Ack).unwrap();
        assert_eq!(json, "{\"type\":\"ack\"}");

        let json =
            serde_json::to_string(&CoordinatorResponse::PollOpenModel { ready: false }).unwrap();
        assert!(json.contains("\"ready\":false"));
    }
}
