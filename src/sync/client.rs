//! One logical request per batch, with bounded retry on transient failure.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::engine::EngineEvent;
use crate::store::PendingVoteStore;
use crate::sync::backoff::BackoffPolicy;
use crate::sync::transport::{
    ReceiptStatus, VoteBatchRequest, VoteBatchResponse, VoteTransport, WireVote,
};
use crate::vote::{BatchId, VoteId};

/// Result of one complete flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// Nothing was pending; no request was made.
    Idle,
    /// A response was reconciled into the store.
    Synced {
        accepted: usize,
        rejected: usize,
        deferred: usize,
    },
    /// The transport kept failing; every vote stays buffered for the next
    /// regular flush cycle.
    Deferred,
}

/// Drives the sync protocol for a single batch at a time.
///
/// The flush scheduler is the sole caller, so no two batches are ever on the
/// wire concurrently and votes marked in-flight cannot be double-sent.
pub(crate) struct SyncClient {
    store: Arc<PendingVoteStore>,
    transport: Arc<dyn VoteTransport>,
    events: mpsc::UnboundedSender<EngineEvent>,
    backoff: BackoffPolicy,
    max_retries: u32,
    max_batch_size: usize,
}

impl SyncClient {
    pub(crate) fn new(
        store: Arc<PendingVoteStore>,
        transport: Arc<dyn VoteTransport>,
        events: mpsc::UnboundedSender<EngineEvent>,
        config: &SyncConfig,
        max_batch_size: usize,
    ) -> Self {
        Self {
            store,
            transport,
            events,
            backoff: BackoffPolicy::new(config.retry_backoff_base_ms, config.retry_backoff_cap_ms),
            max_retries: config.max_retries,
            max_batch_size,
        }
    }

    /// Runs one flush cycle to completion: repeated attempts until the batch
    /// is reconciled or the retry budget is spent.
    ///
    /// The batch is rebuilt from the live store on every attempt, so a vote
    /// the user replaced during a backoff pause is sent with its fresh id
    /// and payload, and a retracted vote is simply never sent again. The
    /// batch id is reused while the vote-id composition is unchanged and
    /// re-minted when it changes.
    pub(crate) async fn flush(&self) -> FlushOutcome {
        let mut attempt: u32 = 0;
        let mut last_batch: Option<(BatchId, Vec<VoteId>)> = None;

        loop {
            let votes = self.store.take_batch(self.max_batch_size);
            if votes.is_empty() {
                return FlushOutcome::Idle;
            }

            let ids: Vec<VoteId> = votes.iter().map(|v| v.id).collect();
            let batch_id = match &last_batch {
                Some((id, sent)) if *sent == ids => *id,
                _ => BatchId::new(),
            };
            last_batch = Some((batch_id, ids.clone()));

            let request = VoteBatchRequest {
                batch_id,
                votes: votes.iter().map(WireVote::from).collect(),
            };
            debug!(
                batch_id = %batch_id,
                votes = request.votes.len(),
                attempt,
                "submitting vote batch"
            );

            match self.transport.submit(&request).await {
                Ok(response) => return self.reconcile(batch_id, &ids, response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    // Requeue before sleeping: the user may keep casting and
                    // replacing votes while we back off.
                    self.store.requeue(&ids);
                    let delay = self.backoff.delay(attempt);
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient sync failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.store.requeue(&ids);
                    let attempts = attempt + 1;
                    warn!(
                        error = %e,
                        attempts,
                        transient = e.is_transient(),
                        "sync failed, votes stay buffered"
                    );
                    let _ = self.events.send(EngineEvent::SyncDeferred { attempts });
                    return FlushOutcome::Deferred;
                }
            }
        }
    }

    /// Applies per-vote receipts to the store. Votes the server did not
    /// mention are requeued for the next cycle.
    fn reconcile(
        &self,
        batch_id: BatchId,
        sent: &[VoteId],
        response: VoteBatchResponse,
    ) -> FlushOutcome {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut reasons: HashMap<VoteId, Option<String>> = HashMap::new();

        for receipt in response.results {
            if !sent.contains(&receipt.id) {
                warn!(batch_id = %batch_id, vote_id = %receipt.id, "receipt for a vote we did not send");
                continue;
            }
            match receipt.status {
                ReceiptStatus::Accepted => accepted.push(receipt.id),
                ReceiptStatus::Rejected => {
                    reasons.insert(receipt.id, receipt.reason);
                    rejected.push(receipt.id);
                }
                ReceiptStatus::Retry => {}
            }
        }

        let unresolved: Vec<VoteId> = sent
            .iter()
            .filter(|id| !accepted.contains(id) && !rejected.contains(id))
            .copied()
            .collect();

        let acked = self.store.acknowledge(&accepted);
        let dropped = self.store.discard(&rejected);
        let deferred = self.store.requeue(&unresolved);

        for vote in &dropped {
            let reason = reasons.get(&vote.id).cloned().flatten();
            info!(
                message_id = %vote.message_id,
                choice = %vote.choice,
                reason = reason.as_deref().unwrap_or("unspecified"),
                "vote rejected by server"
            );
            let _ = self.events.send(EngineEvent::VoteRejected {
                message_id: vote.message_id.clone(),
                choice: vote.choice,
                reason,
            });
        }

        info!(
            batch_id = %batch_id,
            accepted = acked,
            rejected = dropped.len(),
            deferred,
            "vote batch reconciled"
        );
        let _ = self.events.send(EngineEvent::BatchSynced {
            batch_id,
            accepted: acked,
            rejected: dropped.len(),
            deferred,
        });

        FlushOutcome::Synced {
            accepted: acked,
            rejected: dropped.len(),
            deferred,
        }
    }
}
