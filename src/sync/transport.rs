//! Wire contract and transport seam for the vote endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::SyncConfig;
use crate::vote::{BatchId, MessageId, PendingVote, UserContext, VoteChoice, VoteId};

/// One logical request per batch: the batch id plus the votes in cast order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBatchRequest {
    pub batch_id: BatchId,
    pub votes: Vec<WireVote>,
}

/// The wire form of a buffered vote. Sync sub-state never leaves the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireVote {
    pub id: VoteId,
    pub message_id: MessageId,
    pub choice: VoteChoice,
    pub created_at: u64,
    pub user_context: UserContext,
}

impl From<&PendingVote> for WireVote {
    fn from(vote: &PendingVote) -> Self {
        Self {
            id: vote.id,
            message_id: vote.message_id.clone(),
            choice: vote.choice,
            created_at: vote.created_at,
            user_context: vote.user_context.clone(),
        }
    }
}

/// Per-vote verdicts from the server. Votes missing from the response are
/// treated as [`ReceiptStatus::Retry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBatchResponse {
    pub results: Vec<VoteReceipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub id: VoteId,
    pub status: ReceiptStatus,
    /// Human-readable rejection reason, e.g. "message closed".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    /// Recorded by the server; the vote leaves the buffer.
    Accepted,
    /// Refused for good (message expired, closed, duplicate); dropped.
    Rejected,
    /// The server could not decide; the vote stays buffered and is resent.
    Retry,
}

/// Errors that can occur while submitting a batch.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to reach the endpoint
    #[error("Connection failed to '{endpoint}': {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded total timeout
    #[error("Request timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Endpoint returned a non-success status
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Response body did not match the wire contract
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Transient failures are retried with backoff; everything else ends the
    /// flush immediately (the votes are requeued either way).
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connection { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Server { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            TransportError::Decode(_) => false,
        }
    }
}

/// Seam between the sync client and the actual network.
///
/// Exactly one call per batch attempt; the implementation must not retry
/// internally. Test doubles script responses through this trait.
#[async_trait]
pub trait VoteTransport: Send + Sync {
    async fn submit(&self, request: &VoteBatchRequest) -> Result<VoteBatchResponse, TransportError>;
}

/// Production transport: JSON POST to the configured endpoint.
pub struct HttpVoteTransport {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
}

impl HttpVoteTransport {
    pub fn new(config: &SyncConfig) -> Self {
        let client = Client::builder()
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            endpoint: config.endpoint.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    async fn do_submit(
        &self,
        request: &VoteBatchRequest,
    ) -> Result<VoteBatchResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Connection {
                endpoint: self.endpoint.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<VoteBatchResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl VoteTransport for HttpVoteTransport {
    async fn submit(&self, request: &VoteBatchRequest) -> Result<VoteBatchResponse, TransportError> {
        let result = timeout(self.request_timeout, self.do_submit(request)).await;

        match result {
            Ok(response) => response,
            Err(_) => Err(TransportError::Timeout {
                duration_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}
