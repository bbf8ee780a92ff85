//! Batch delivery to the vote endpoint: wire contract, transport seam,
//! retry policy, and the sync client that ties them together.

mod backoff;
mod client;
mod transport;

pub(crate) use client::{FlushOutcome, SyncClient};
pub use transport::{
    HttpVoteTransport, ReceiptStatus, TransportError, VoteBatchRequest, VoteBatchResponse,
    VoteReceipt, VoteTransport, WireVote,
};
