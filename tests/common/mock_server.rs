//! Mock vote-batch server for end-to-end sync tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// One vote as it appeared on the wire.
#[derive(Debug, Clone)]
pub struct CapturedVote {
    pub id: String,
    pub message_id: String,
    pub choice: i64,
}

/// A captured batch request for assertions.
#[derive(Debug, Clone)]
pub struct CapturedBatch {
    pub batch_id: String,
    pub votes: Vec<CapturedVote>,
    /// The request body exactly as parsed, for wire-shape assertions.
    pub raw: Value,
}

/// Per-position verdicts for a scripted reply. Votes beyond the end of the
/// script are accepted.
#[derive(Debug, Clone, Copy)]
pub enum Verdict {
    Accept,
    Reject(&'static str),
    Retry,
}

/// A scripted reply to return for one batch request.
#[derive(Debug, Clone)]
pub struct MockReply {
    kind: ReplyKind,
    delay_ms: u64,
}

#[derive(Debug, Clone)]
enum ReplyKind {
    AcceptAll,
    Verdicts(Vec<Verdict>),
    Error { status: u16, message: String },
}

impl Default for MockReply {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl MockReply {
    /// Accept every vote in the batch.
    pub fn accept_all() -> Self {
        Self {
            kind: ReplyKind::AcceptAll,
            delay_ms: 0,
        }
    }

    /// Apply verdicts to the batch by position.
    pub fn verdicts(verdicts: impl Into<Vec<Verdict>>) -> Self {
        Self {
            kind: ReplyKind::Verdicts(verdicts.into()),
            delay_ms: 0,
        }
    }

    /// A plain HTTP error with a JSON body.
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            kind: ReplyKind::Error {
                status,
                message: message.to_string(),
            },
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

#[derive(Clone)]
struct MockState {
    batches: Arc<Mutex<Vec<CapturedBatch>>>,
    replies: Arc<Mutex<VecDeque<MockReply>>>,
}

/// Mock server speaking the vote-batch wire protocol.
pub struct MockVoteServer {
    pub addr: SocketAddr,
    state: MockState,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl MockVoteServer {
    /// Start a new mock vote server on an ephemeral port.
    pub async fn start() -> Self {
        let state = MockState {
            batches: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
        };

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        let app = Router::new()
            .route("/api/votes/batch", post(handle_batch))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .ok();
        });

        // Wait for server to be ready
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

        Self {
            addr,
            state,
            shutdown: shutdown_tx,
        }
    }

    /// Enqueue a reply for the next batch request. Requests beyond the
    /// scripted queue are accepted in full.
    pub async fn enqueue_reply(&self, reply: MockReply) {
        self.state.replies.lock().await.push_back(reply);
    }

    /// Get all captured batch requests.
    pub async fn captured_batches(&self) -> Vec<CapturedBatch> {
        self.state.batches.lock().await.clone()
    }

    /// The full endpoint URL for this mock server.
    pub fn endpoint(&self) -> String {
        format!("http://{}/api/votes/batch", self.addr)
    }

    /// Clear captured batches and any unused replies.
    pub async fn clear(&self) {
        self.state.batches.lock().await.clear();
        self.state.replies.lock().await.clear();
    }
}

impl Drop for MockVoteServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn handle_batch(State(state): State<MockState>, req: Request<Body>) -> Response<Body> {
    let body_bytes = axum::body::to_bytes(req.into_body(), 1024 * 1024)
        .await
        .unwrap_or_default()
        .to_vec();
    let raw: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    // Capture the batch
    let votes: Vec<CapturedVote> = raw["votes"]
        .as_array()
        .map(|votes| {
            votes
                .iter()
                .map(|v| CapturedVote {
                    id: v["id"].as_str().unwrap_or_default().to_string(),
                    message_id: v["messageId"].as_str().unwrap_or_default().to_string(),
                    choice: v["choice"].as_i64().unwrap_or(i64::MIN),
                })
                .collect()
        })
        .unwrap_or_default();

    state.batches.lock().await.push(CapturedBatch {
        batch_id: raw["batchId"].as_str().unwrap_or_default().to_string(),
        votes: votes.clone(),
        raw,
    });

    // Get next reply or accept everything
    let reply = state.replies.lock().await.pop_front().unwrap_or_default();

    // Apply delay if configured
    if reply.delay_ms > 0 {
        tokio::time::sleep(tokio::time::Duration::from_millis(reply.delay_ms)).await;
    }

    let (status, body) = match reply.kind {
        ReplyKind::Error { status, message } => {
            (status, json!({ "error": message }).to_string())
        }
        ReplyKind::AcceptAll => {
            let results: Vec<Value> = votes
                .iter()
                .map(|v| json!({ "id": v.id, "status": "accepted" }))
                .collect();
            (200, json!({ "results": results }).to_string())
        }
        ReplyKind::Verdicts(verdicts) => {
            let results: Vec<Value> = votes
                .iter()
                .enumerate()
                .map(|(i, v)| match verdicts.get(i) {
                    Some(Verdict::Reject(reason)) => {
                        json!({ "id": v.id, "status": "rejected", "reason": reason })
                    }
                    Some(Verdict::Retry) => json!({ "id": v.id, "status": "retry" }),
                    Some(Verdict::Accept) | None => {
                        json!({ "id": v.id, "status": "accepted" })
                    }
                })
                .collect();
            (200, json!({ "results": results }).to_string())
        }
    };

    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}
