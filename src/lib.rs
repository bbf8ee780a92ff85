//! Buffered vote capture with batched, idempotent delivery.
//!
//! votedeck sits between a swipe-to-vote UI and a single server endpoint:
//! casts land in a [`store::PendingVoteStore`], a scheduler task picks the
//! flush moments (debounce, max interval, size threshold, teardown), and the
//! [`sync`] client ships each batch as one request with idempotent vote ids,
//! bounded retries, and per-vote reconciliation. [`engine::VoteEngine`] is
//! the facade a UI binding drives; undo is instantaneous and local whenever
//! the vote has not left the client, and a compensating cast otherwise.

pub mod config;
pub mod engine;
pub mod journal;
mod scheduler;
pub mod store;
pub mod sync;
pub mod undo;
pub mod vote;

pub use config::{Config, ConfigError, ScheduleConfig, SyncConfig};
pub use engine::{EngineEvent, VoteEngine};
pub use journal::{FileJournal, JournalError, JournalState, VoteJournal};
pub use store::{PendingVoteStore, StoreSnapshot};
pub use sync::{HttpVoteTransport, TransportError, VoteTransport};
pub use undo::UndoOutcome;
pub use vote::{
    BatchId, ChoiceError, ContextProvider, MessageId, PendingVote, StaticContext, UserContext,
    VoteChoice, VoteId, VoteState,
};

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. Call once at startup;
/// filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}
