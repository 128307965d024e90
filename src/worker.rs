// src/worker.rs

//! Message channel to the out-of-process proctoring worker.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Messages sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    #[serde(rename_all = "camelCase")]
    Ping {
        timeout: u64,
        attempt_external_id: Option<String>,
    },
}

/// Messages received from the worker. Anything but `echo` is a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerReply {
    Echo,
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[async_trait]
pub trait WorkerChannel: Send + Sync {
    /// Sends a ping and waits up to `timeout` for the echo.
    async fn ping(
        &self,
        worker_url: &str,
        timeout: Duration,
        attempt_external_id: Option<&str>,
    ) -> Result<(), AppError>;
}

/// Worker reachable over HTTP on the learner's machine.
#[derive(Clone)]
pub struct HttpWorkerChannel {
    http: reqwest::Client,
}

impl HttpWorkerChannel {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for HttpWorkerChannel {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl WorkerChannel for HttpWorkerChannel {
    async fn ping(
        &self,
        worker_url: &str,
        timeout: Duration,
        attempt_external_id: Option<&str>,
    ) -> Result<(), AppError> {
        let request = WorkerRequest::Ping {
            timeout: timeout.as_secs(),
            attempt_external_id: attempt_external_id.map(str::to_string),
        };

        let exchange = async {
            let response = self.http.post(worker_url).json(&request).send().await?;
            if !response.status().is_success() {
                return Err(AppError::Heartbeat(format!(
                    "worker answered with status {}",
                    response.status()
                )));
            }
            Ok::<_, AppError>(response.json::<WorkerReply>().await?)
        };

        let reply = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| AppError::Heartbeat("worker did not answer in time".to_string()))?
            .map_err(|e| AppError::Heartbeat(e.message().to_string()))?;

        match reply {
            WorkerReply::Echo => Ok(()),
            WorkerReply::Error { error } => Err(AppError::Heartbeat(
                error.unwrap_or_else(|| "worker reported an error".to_string()),
            )),
            WorkerReply::Other => Err(AppError::Heartbeat(
                "unexpected worker reply".to_string(),
            )),
        }
    }
}
