//! In-memory buffer of votes awaiting server acknowledgment.
//!
//! One store instance is shared by the engine facade, the flush scheduler,
//! and the sync client. Every operation is synchronous and atomic under a
//! single lock; observers receive derived state through watch channels
//! rather than callbacks, so the store never re-enters caller code.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::journal::{JournalState, VoteJournal};
use crate::vote::{MessageId, PendingVote, UserContext, VoteChoice, VoteId, VoteState};

/// Read-only view published after every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Votes eligible for the next batch.
    pub pending: usize,
    /// Votes currently on the wire.
    pub in_flight: usize,
    /// Replacement casts waiting for an in-flight partner to resolve.
    pub queued_overrides: usize,
    /// Effective latest choice per message, overrides included.
    pub choices: HashMap<MessageId, VoteChoice>,
}

impl StoreSnapshot {
    /// Total buffered decisions (matches [`PendingVoteStore::count`]).
    pub fn buffered(&self) -> usize {
        self.pending + self.in_flight + self.queued_overrides
    }
}

/// Scheduler-facing mutation watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StoreActivity {
    /// Bumped once per cast, including casts that only queue an override.
    pub casts: u64,
    pub pending: usize,
    pub buffered: usize,
}

/// A replacement cast held back while its partner vote is on the wire.
struct QueuedOverride {
    vote: PendingVote,
    /// Cast sequence the override occupies if promoted after an acknowledge.
    seq: u64,
}

#[derive(Default)]
struct StoreInner {
    /// Live votes by cast sequence, oldest first.
    votes: BTreeMap<u64, PendingVote>,
    /// Message -> cast sequence of its live vote.
    by_message: HashMap<MessageId, u64>,
    /// Vote id -> cast sequence.
    by_id: HashMap<VoteId, u64>,
    /// At most one queued override per message, and only while that
    /// message's live vote is in flight.
    overrides: HashMap<MessageId, QueuedOverride>,
    next_seq: u64,
    last_created_at: u64,
    casts: u64,
}

/// The single shared mutable resource of the engine.
///
/// Owned by [`crate::engine::VoteEngine`]; the UI binding only ever sees
/// derived state (snapshots, counts, optimistic choices) and issues commands
/// through the engine.
pub struct PendingVoteStore {
    inner: Mutex<StoreInner>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
    activity_tx: watch::Sender<StoreActivity>,
    journal: Option<Arc<dyn VoteJournal>>,
}

impl PendingVoteStore {
    /// Creates a store, restoring any journaled votes from a previous
    /// session. Restored votes re-enter as pending; their ids are preserved
    /// so a resend of something the server already accepted stays idempotent.
    /// An unreadable journal degrades to an empty buffer, never an error.
    pub fn new(journal: Option<Arc<dyn VoteJournal>>) -> Self {
        let mut inner = StoreInner::default();

        if let Some(journal) = &journal {
            match journal.load() {
                Ok(state) => inner.restore(state),
                Err(e) => {
                    warn!(error = %e, "vote journal unreadable, starting with empty buffer");
                }
            }
        }

        let (snapshot_tx, _) = watch::channel(inner.snapshot());
        let (activity_tx, _) = watch::channel(inner.activity());

        Self {
            inner: Mutex::new(inner),
            snapshot_tx,
            activity_tx,
            journal,
        }
    }

    /// Records a vote, returning the stored entry.
    ///
    /// If an unflushed vote for the same message already exists it is
    /// replaced in place: the old payload is discarded unsent, and the
    /// replacement keeps the old vote's cast position and timestamp under a
    /// fresh id. If the existing vote is in flight, the cast is queued as an
    /// override that takes effect once the outstanding batch resolves.
    /// Never fails; the buffer stays writable through every sync state.
    pub fn cast_vote(
        &self,
        message_id: MessageId,
        choice: VoteChoice,
        context: UserContext,
    ) -> PendingVote {
        let mut inner = self.inner.lock();
        let (vote, disposition) = inner.cast(message_id, choice, context);
        debug!(
            message_id = %vote.message_id,
            choice = %vote.choice,
            vote_id = %vote.id,
            disposition,
            "vote cast"
        );
        self.publish(&inner);
        vote
    }

    /// Up to `limit` pending votes in cast order, as read-only clones.
    /// In-flight votes and queued overrides are not eligible.
    pub fn peek_oldest_unflushed(&self, limit: usize) -> Vec<PendingVote> {
        self.inner.lock().peek(limit)
    }

    /// Transitions the given votes from pending to in-flight. Unknown ids
    /// (e.g. a vote replaced since it was peeked) are ignored.
    pub fn mark_in_flight(&self, ids: &[VoteId]) {
        let mut inner = self.inner.lock();
        if inner.mark_in_flight(ids) > 0 {
            self.publish(&inner);
        }
    }

    /// Atomically peeks up to `limit` pending votes and marks them in-flight,
    /// so no cast can slip between selection and marking. This is what the
    /// sync client uses to open a batch.
    pub fn take_batch(&self, limit: usize) -> Vec<PendingVote> {
        let mut inner = self.inner.lock();
        let mut votes = inner.peek(limit);
        let ids: Vec<VoteId> = votes.iter().map(|v| v.id).collect();
        if inner.mark_in_flight(&ids) > 0 {
            self.publish(&inner);
        }
        for vote in &mut votes {
            vote.state = VoteState::InFlight;
        }
        votes
    }

    /// Success path: removes acknowledged votes entirely and promotes any
    /// queued override for the same message to pending. Idempotent; unknown
    /// ids are ignored. Returns how many votes were removed.
    pub fn acknowledge(&self, ids: &[VoteId]) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.remove(ids).len();
        if removed > 0 {
            debug!(removed, "votes acknowledged");
            self.publish(&inner);
        }
        removed
    }

    /// Rejection path: same store effect as [`acknowledge`], but the removed
    /// votes are returned so the caller can surface the rejection.
    ///
    /// [`acknowledge`]: PendingVoteStore::acknowledge
    pub fn discard(&self, ids: &[VoteId]) -> Vec<PendingVote> {
        let mut inner = self.inner.lock();
        let dropped = inner.remove(ids);
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "rejected votes dropped from buffer");
            self.publish(&inner);
        }
        dropped
    }

    /// Failure path: returns in-flight votes to pending in their original
    /// cast order. If an override was queued for a message, the override
    /// replaces the requeued vote immediately, keeping the original position
    /// and timestamp; the stale payload is discarded unsent.
    pub fn requeue(&self, ids: &[VoteId]) -> usize {
        let mut inner = self.inner.lock();
        let requeued = inner.requeue(ids);
        if requeued > 0 {
            debug!(requeued, "votes returned to pending");
            self.publish(&inner);
        }
        requeued
    }

    /// Undo support: removes and returns the queued override for the message
    /// if one exists, otherwise the pending vote. In-flight votes are not
    /// retractable; `None` means the caller needs a compensating cast.
    pub fn retract(&self, message_id: &MessageId) -> Option<PendingVote> {
        let mut inner = self.inner.lock();
        let retracted = inner.retract(message_id);
        if let Some(vote) = &retracted {
            debug!(message_id = %vote.message_id, vote_id = %vote.id, "vote retracted");
            self.publish(&inner);
        }
        retracted
    }

    /// Total buffered decisions: pending, in-flight, and queued overrides.
    pub fn count(&self) -> usize {
        let inner = self.inner.lock();
        inner.votes.len() + inner.overrides.len()
    }

    /// Votes eligible for a batch right now. A flush is only worth firing
    /// when this is non-zero.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending_count()
    }

    /// The user's effective latest decision for a message, overrides
    /// included. `None` once the vote is acknowledged or was never cast.
    pub fn optimistic_choice(&self, message_id: &MessageId) -> Option<VoteChoice> {
        let inner = self.inner.lock();
        if let Some(over) = inner.overrides.get(message_id) {
            return Some(over.vote.choice);
        }
        let seq = inner.by_message.get(message_id)?;
        inner.votes.get(seq).map(|v| v.choice)
    }

    /// Observes snapshots of derived state, published after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub(crate) fn subscribe_activity(&self) -> watch::Receiver<StoreActivity> {
        self.activity_tx.subscribe()
    }

    /// Publishes derived state and writes through the journal. Called with
    /// the lock held so no observer sees a half-applied mutation.
    fn publish(&self, inner: &StoreInner) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.save(&inner.journal_state()) {
                warn!(error = %e, "failed to persist vote journal");
            }
        }
        self.snapshot_tx.send_replace(inner.snapshot());
        self.activity_tx.send_replace(inner.activity());
    }
}

enum CastDisposition {
    New,
    Replaced,
    OverrideQueued,
    OverrideReplaced,
}

impl StoreInner {
    fn cast(
        &mut self,
        message_id: MessageId,
        choice: VoteChoice,
        context: UserContext,
    ) -> (PendingVote, &'static str) {
        self.casts += 1;

        let live = self.by_message.get(&message_id).copied().and_then(|seq| {
            self.votes
                .get(&seq)
                .map(|v| (seq, v.is_in_flight(), v.created_at, v.id))
        });

        let (vote, disposition) = match live {
            // Partner on the wire: hold the cast back as an override.
            Some((_, true, _, _)) => {
                let (seq, created_at, disposition) = match self.overrides.remove(&message_id) {
                    Some(prev) => (
                        prev.seq,
                        prev.vote.created_at,
                        CastDisposition::OverrideReplaced,
                    ),
                    None => (
                        self.alloc_seq(),
                        self.next_timestamp(),
                        CastDisposition::OverrideQueued,
                    ),
                };
                let vote = PendingVote {
                    id: VoteId::new(),
                    message_id: message_id.clone(),
                    choice,
                    created_at,
                    user_context: context,
                    state: VoteState::Pending,
                };
                self.overrides.insert(
                    message_id,
                    QueuedOverride {
                        vote: vote.clone(),
                        seq,
                    },
                );
                (vote, disposition)
            }
            // Unflushed vote: replace in place, position and timestamp kept.
            Some((seq, false, created_at, old_id)) => {
                self.by_id.remove(&old_id);
                let vote = PendingVote {
                    id: VoteId::new(),
                    message_id,
                    choice,
                    created_at,
                    user_context: context,
                    state: VoteState::Pending,
                };
                self.by_id.insert(vote.id, seq);
                self.votes.insert(seq, vote.clone());
                (vote, CastDisposition::Replaced)
            }
            None => {
                let seq = self.alloc_seq();
                let created_at = self.next_timestamp();
                let vote = PendingVote {
                    id: VoteId::new(),
                    message_id: message_id.clone(),
                    choice,
                    created_at,
                    user_context: context,
                    state: VoteState::Pending,
                };
                self.by_message.insert(message_id, seq);
                self.by_id.insert(vote.id, seq);
                self.votes.insert(seq, vote.clone());
                (vote, CastDisposition::New)
            }
        };

        let disposition = match disposition {
            CastDisposition::New => "new",
            CastDisposition::Replaced => "replaced",
            CastDisposition::OverrideQueued => "override_queued",
            CastDisposition::OverrideReplaced => "override_replaced",
        };
        (vote, disposition)
    }

    fn peek(&self, limit: usize) -> Vec<PendingVote> {
        self.votes
            .values()
            .filter(|v| !v.is_in_flight())
            .take(limit)
            .cloned()
            .collect()
    }

    fn mark_in_flight(&mut self, ids: &[VoteId]) -> usize {
        let mut marked = 0;
        for id in ids {
            let Some(seq) = self.by_id.get(id).copied() else {
                continue;
            };
            if let Some(vote) = self.votes.get_mut(&seq) {
                if !vote.is_in_flight() {
                    vote.state = VoteState::InFlight;
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Shared mechanics of acknowledge and discard: drop the vote, promote
    /// any queued override for its message into the live set.
    fn remove(&mut self, ids: &[VoteId]) -> Vec<PendingVote> {
        let mut removed = Vec::new();
        for id in ids {
            let Some(seq) = self.by_id.remove(id) else {
                continue;
            };
            let Some(vote) = self.votes.remove(&seq) else {
                continue;
            };
            self.by_message.remove(&vote.message_id);

            if let Some(QueuedOverride { vote: promoted, seq }) =
                self.overrides.remove(&vote.message_id)
            {
                self.by_message.insert(promoted.message_id.clone(), seq);
                self.by_id.insert(promoted.id, seq);
                self.votes.insert(seq, promoted);
            }

            removed.push(vote);
        }
        removed
    }

    fn requeue(&mut self, ids: &[VoteId]) -> usize {
        let mut requeued = 0;
        for id in ids {
            let Some(seq) = self.by_id.get(id).copied() else {
                continue;
            };
            let Some((message_id, created_at, stale_id, in_flight)) = self
                .votes
                .get(&seq)
                .map(|v| (v.message_id.clone(), v.created_at, v.id, v.is_in_flight()))
            else {
                continue;
            };
            if !in_flight {
                continue;
            }

            match self.overrides.remove(&message_id) {
                // The user already superseded this payload while it was on
                // the wire; the override takes its slot and the stale vote
                // is never sent again.
                Some(over) => {
                    let mut replacement = over.vote;
                    replacement.created_at = created_at;
                    replacement.state = VoteState::Pending;
                    self.by_id.remove(&stale_id);
                    self.by_id.insert(replacement.id, seq);
                    self.votes.insert(seq, replacement);
                    debug!(message_id = %message_id, "override replaced requeued vote");
                }
                None => {
                    if let Some(vote) = self.votes.get_mut(&seq) {
                        vote.state = VoteState::Pending;
                    }
                }
            }
            requeued += 1;
        }
        requeued
    }

    fn retract(&mut self, message_id: &MessageId) -> Option<PendingVote> {
        if let Some(over) = self.overrides.remove(message_id) {
            return Some(over.vote);
        }

        let seq = self.by_message.get(message_id).copied()?;
        let retractable = self.votes.get(&seq).is_some_and(|v| !v.is_in_flight());
        if !retractable {
            return None;
        }

        let vote = self.votes.remove(&seq)?;
        self.by_message.remove(message_id);
        self.by_id.remove(&vote.id);
        Some(vote)
    }

    fn restore(&mut self, state: JournalState) {
        if state.votes.is_empty() {
            return;
        }

        let mut restored = 0usize;
        for mut vote in state.votes {
            if self.by_message.contains_key(&vote.message_id)
                || self.by_id.contains_key(&vote.id)
            {
                warn!(message_id = %vote.message_id, "duplicate journal entry skipped");
                continue;
            }
            vote.state = VoteState::Pending;
            self.last_created_at = self.last_created_at.max(vote.created_at);
            let seq = self.alloc_seq();
            self.by_message.insert(vote.message_id.clone(), seq);
            self.by_id.insert(vote.id, seq);
            self.votes.insert(seq, vote);
            restored += 1;
        }
        info!(restored, "buffered votes restored from journal");
    }

    fn pending_count(&self) -> usize {
        self.votes.values().filter(|v| !v.is_in_flight()).count()
    }

    fn snapshot(&self) -> StoreSnapshot {
        let mut choices = HashMap::with_capacity(self.by_message.len());
        for (message_id, seq) in &self.by_message {
            let choice = match self.overrides.get(message_id) {
                Some(over) => Some(over.vote.choice),
                None => self.votes.get(seq).map(|v| v.choice),
            };
            if let Some(choice) = choice {
                choices.insert(message_id.clone(), choice);
            }
        }

        let pending = self.pending_count();
        StoreSnapshot {
            pending,
            in_flight: self.votes.len() - pending,
            queued_overrides: self.overrides.len(),
            choices,
        }
    }

    fn activity(&self) -> StoreActivity {
        StoreActivity {
            casts: self.casts,
            pending: self.pending_count(),
            buffered: self.votes.len() + self.overrides.len(),
        }
    }

    /// Effective pending list for persistence: live votes in cast order,
    /// with queued overrides substituted in at their partner's position, as
    /// if every outstanding batch had failed and collapsed.
    fn journal_state(&self) -> JournalState {
        let votes = self
            .votes
            .values()
            .map(|vote| {
                let mut effective = match self.overrides.get(&vote.message_id) {
                    Some(over) => {
                        let mut v = over.vote.clone();
                        v.created_at = vote.created_at;
                        v
                    }
                    None => vote.clone(),
                };
                effective.state = VoteState::Pending;
                effective
            })
            .collect();
        JournalState { votes }
    }

    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Wall clock in milliseconds, clamped forward so timestamps are
    /// strictly increasing within a session even if the clock steps back.
    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let ts = now.max(self.last_created_at + 1);
        self.last_created_at = ts;
        ts
    }
}
