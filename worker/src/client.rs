//! HTTP client for talking back to the coordinator.

use crate::error::{Result, WorkerError};
use protocol::{CoordinatorMessage, WorkerAddress};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Posts typed messages to the coordinator's message endpoint.
pub struct CoordinatorClient {
    client: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    /// Send one message; the coordinator's ack body is discarded.
    pub async fn send(&self, message: &CoordinatorMessage) -> Result<()> {
        let url = format!("{}/api/message", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(message)
            .send()
            .await
            .map_err(|e| WorkerError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WorkerError::Http(format!(
                "coordinator answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Announce this worker to the coordinator, retrying with exponential
    /// backoff until the announcement lands.
    pub async fn announce(&self, address: WorkerAddress, free_memory_bytes: u64) -> Result<()> {
        let message = CoordinatorMessage::WorkerJoined {
            address: address.clone(),
            free_memory_bytes,
        };

        let mut retry_delay = Duration::from_secs(1);
        let max_retries = 5;

        for attempt in 1..=max_retries {
            match self.send(&message).await {
                Ok(()) => {
                    info!(
                        address = %address,
                        free_memory_bytes,
                        attempt,
                        "Joined the coordinator"
                    );
                    return Ok(());
                }
                Err(e) if attempt < max_retries => {
                    warn!(
                        attempt,
                        retry_in = ?retry_delay,
                        error = %e,
                        "Join failed, retrying"
                    );
                    sleep(retry_delay).await;
                    retry_delay = std::cmp::min(retry_delay * 2, Duration::from_secs(60));
                }
                Err(e) => {
                    error!(attempts = max_retries, error = %e, "Join failed after all retries");
                    return Err(e);
                }
            }
        }

        unreachable!()
    }
}
