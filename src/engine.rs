//! Session facade: the one surface a UI binding drives.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::journal::VoteJournal;
use crate::scheduler::{self, SchedulerHandle};
use crate::store::{PendingVoteStore, StoreSnapshot};
use crate::sync::{SyncClient, VoteTransport};
use crate::undo::{UndoLedger, UndoOutcome};
use crate::vote::{BatchId, ContextProvider, MessageId, PendingVote, VoteChoice};

/// Notifications for the UI binding. Single consumer; see
/// [`VoteEngine::take_events`]. None of these interrupt the ability to keep
/// casting votes.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The server explicitly refused this vote. It has been dropped from
    /// the buffer and the optimistic display should be reconciled.
    VoteRejected {
        message_id: MessageId,
        choice: VoteChoice,
        reason: Option<String>,
    },
    /// A batch finished reconciling against the store.
    BatchSynced {
        batch_id: BatchId,
        accepted: usize,
        rejected: usize,
        deferred: usize,
    },
    /// A flush gave up for now; every vote it carried is still buffered and
    /// will be swept by a later cycle.
    SyncDeferred { attempts: u32 },
}

/// Owns the store, the undo ledger, and the flush scheduler task.
///
/// Constructed once per session with [`VoteEngine::start`]. The UI binding
/// issues commands (`cast_vote`, `undo`, `request_flush`, `shutdown`) and
/// observes derived state; it never touches the store directly.
pub struct VoteEngine {
    store: Arc<PendingVoteStore>,
    context: Arc<dyn ContextProvider>,
    undo: Mutex<UndoLedger>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl VoteEngine {
    /// Builds the store (restoring any journaled votes), spawns the flush
    /// scheduler, and returns the facade.
    ///
    /// Must be called from within a tokio runtime. Fails only on an invalid
    /// configuration; sync failures later never surface as errors here.
    pub fn start(
        config: Config,
        transport: Arc<dyn VoteTransport>,
        context: Arc<dyn ContextProvider>,
        journal: Option<Arc<dyn VoteJournal>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = Arc::new(PendingVoteStore::new(journal));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = SyncClient::new(
            store.clone(),
            transport,
            events_tx,
            &config.sync,
            config.schedule.max_batch_size,
        );
        let handle = scheduler::spawn(store.clone(), client, config.schedule.clone());

        info!(endpoint = %config.sync.endpoint, "vote engine started");
        Ok(Self {
            store,
            context,
            undo: Mutex::new(UndoLedger::new()),
            scheduler: Mutex::new(Some(handle)),
            events: Mutex::new(Some(events_rx)),
        })
    }

    /// Records a reaction to a statement. Always succeeds, whatever state
    /// the sync machinery is in.
    ///
    /// Replacement and override semantics live in the store; the engine
    /// snapshots the user context and arms the undo ledger.
    pub fn cast_vote(&self, message_id: impl Into<MessageId>, choice: VoteChoice) -> PendingVote {
        let message_id = message_id.into();
        let prior = self.store.optimistic_choice(&message_id);
        self.undo.lock().record(message_id.clone(), prior);
        self.store
            .cast_vote(message_id, choice, self.context.snapshot())
    }

    /// Undoes the most recent cast.
    ///
    /// A vote that never left the client is retracted with no network
    /// traffic. A vote already on the wire or acknowledged gets a
    /// compensating cast of the prior choice (Skip when there was none)
    /// through the normal flush cycle. With nothing to undo this is a
    /// benign no-op.
    pub fn undo(&self) -> UndoOutcome {
        let entry = self.undo.lock().take_last();
        let Some((message_id, prior)) = entry else {
            debug!("undo with empty history");
            return UndoOutcome::NothingToUndo;
        };

        if let Some(retracted) = self.store.retract(&message_id) {
            debug!(
                message_id = %message_id,
                choice = %retracted.choice,
                "undo retracted unflushed vote"
            );
            return UndoOutcome::Retracted { message_id };
        }

        // Compensating cast, deliberately not re-recorded in the ledger:
        // undo stays a single affordance.
        let choice = prior.unwrap_or(VoteChoice::Skip);
        self.store
            .cast_vote(message_id.clone(), choice, self.context.snapshot());
        debug!(message_id = %message_id, choice = %choice, "undo cast compensating vote");
        UndoOutcome::Corrected { message_id, choice }
    }

    /// Votes eligible for the next batch.
    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    /// The user's effective latest decision for a message, for optimistic
    /// display.
    pub fn optimistic_choice(&self, message_id: &MessageId) -> Option<VoteChoice> {
        self.store.optimistic_choice(message_id)
    }

    /// Observes store snapshots, published after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.store.subscribe()
    }

    /// The engine's event stream. Single consumer: the first call gets the
    /// receiver, later calls return `None`.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events.lock().take()
    }

    /// Asks the scheduler for a prompt flush without waiting for timers,
    /// e.g. when the embedder is about to lose visibility.
    pub fn request_flush(&self) {
        if let Some(handle) = self.scheduler.lock().as_ref() {
            handle.request_flush();
        }
    }

    /// One final best-effort flush, then stops the scheduler task.
    ///
    /// Idempotent. Casts landing after shutdown stay buffered (and
    /// journaled, when a journal is configured) but no longer sync.
    pub async fn shutdown(&self) {
        let handle = self.scheduler.lock().take();
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                info!("vote engine stopped");
            }
            None => debug!("engine shutdown called twice"),
        }
    }
}
