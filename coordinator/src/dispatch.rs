//! Outbound dispatch to workers.
//!
//! Every hop and load instruction is fire-and-forget from the handler's
//! perspective: the handler registers the pending unit, spawns the send,
//! and returns. The worker's answer arrives later as a separate inbound
//! message. [`Dispatcher`] is a trait so tests can capture dispatches
//! in memory instead of talking HTTP.

use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use protocol::{WorkerAddress, WorkerMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, worker: &WorkerAddress, message: WorkerMessage) -> Result<()>;
}

/// Posts messages to a worker's `/api/message` endpoint.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoordinatorError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, worker: &WorkerAddress, message: WorkerMessage) -> Result<()> {
        let url = format!("{}/api/message", worker.as_str());
        let response = self
            .client
            .post(&url)
            .json(&message)
            .send()
            .await
            .map_err(|e| CoordinatorError::Transport {
                worker: worker.to_string(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CoordinatorError::Transport {
                worker: worker.to_string(),
                detail: format!("worker answered {}", response.status()),
            });
        }

        Ok(())
    }
}

/// Send without waiting. A delivery failure is logged and isolated to the
/// affected query or load task; nothing retries.
pub fn fire_and_forget(
    dispatcher: Arc<dyn Dispatcher>,
    worker: WorkerAddress,
    message: WorkerMessage,
) {
    tokio::spawn(async move {
        if let Err(e) = dispatcher.send(&worker, message).await {
            warn!(worker = %worker, error = %e, "Dispatch failed; the pending unit will stall");
        }
    });
}
