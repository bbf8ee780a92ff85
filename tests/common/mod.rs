//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_server;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use votedeck::sync::{
    ReceiptStatus, VoteBatchRequest, VoteBatchResponse, VoteReceipt, VoteTransport,
};
use votedeck::{
    Config, EngineEvent, ScheduleConfig, StaticContext, SyncConfig, TransportError, VoteEngine,
};

/// Config with fast timings pointed at a mock server, so real-time tests
/// finish quickly.
pub fn quick_config(endpoint: &str) -> Config {
    Config {
        schedule: ScheduleConfig {
            debounce_ms: 50,
            max_interval_ms: 2_000,
            max_batch_size: 20,
        },
        sync: SyncConfig {
            endpoint: endpoint.to_string(),
            request_timeout_ms: 2_000,
            max_retries: 2,
            retry_backoff_base_ms: 20,
            retry_backoff_cap_ms: 100,
        },
    }
}

/// Build receipts accepting every vote in the request.
pub fn accept_all(request: &VoteBatchRequest) -> VoteBatchResponse {
    VoteBatchResponse {
        results: request
            .votes
            .iter()
            .map(|v| VoteReceipt {
                id: v.id,
                status: ReceiptStatus::Accepted,
                reason: None,
            })
            .collect(),
    }
}

// -- Scripted transport --------------------------------------------------------

/// What the scripted transport does with one request.
pub enum ScriptStep {
    /// Accept every vote.
    AcceptAll,
    /// Accept every vote after holding the request open.
    AcceptAllAfter(Duration),
    /// Fail the request.
    Fail(TransportError),
}

/// In-process transport driven by a queue of scripted steps. Requests past
/// the end of the script are accepted in full.
///
/// Every request is captured together with the tokio instant it arrived, so
/// paused-time tests can assert exactly when the scheduler fired.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<(VoteBatchRequest, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: ScriptStep) {
        self.script.lock().push_back(step);
    }

    /// All captured requests, in arrival order.
    pub fn requests(&self) -> Vec<VoteBatchRequest> {
        self.requests.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Arrival instants of the captured requests.
    pub fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().iter().map(|(_, at)| *at).collect()
    }

    /// The highest number of requests ever open at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoteTransport for ScriptedTransport {
    async fn submit(
        &self,
        request: &VoteBatchRequest,
    ) -> Result<VoteBatchResponse, TransportError> {
        self.requests.lock().push((request.clone(), Instant::now()));
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(active, Ordering::SeqCst);

        let step = self.script.lock().pop_front();
        let result = match step {
            None | Some(ScriptStep::AcceptAll) => Ok(accept_all(request)),
            Some(ScriptStep::AcceptAllAfter(hold)) => {
                tokio::time::sleep(hold).await;
                Ok(accept_all(request))
            }
            Some(ScriptStep::Fail(e)) => Err(e),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// -- Engine builders -----------------------------------------------------------

/// Engine wired to an in-process scripted transport, with the event stream
/// already claimed.
pub fn scripted_engine(
    config: Config,
) -> (VoteEngine, Arc<ScriptedTransport>, UnboundedReceiver<EngineEvent>) {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = VoteEngine::start(
        config,
        transport.clone(),
        Arc::new(StaticContext::default()),
        None,
    )
    .expect("config is valid");
    let events = engine.take_events().expect("events not yet taken");
    (engine, transport, events)
}

// -- Async assertions ----------------------------------------------------------

/// Wait until the transport has seen at least `n` requests. Under paused
/// time the polling sleeps let the runtime advance through scheduler timers.
pub async fn wait_for_requests(transport: &ScriptedTransport, n: usize) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while transport.requests().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("transport never reached the expected request count");
}

/// Receive the next engine event, failing the test on a stalled stream.
pub async fn next_event(events: &mut UnboundedReceiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for an engine event")
        .expect("event channel closed")
}
