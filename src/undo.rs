//! One-deep undo history for the most recent cast.

use crate::vote::{MessageId, VoteChoice};

/// What [`crate::engine::VoteEngine::undo`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// The vote never left the client and was removed from the buffer; no
    /// network traffic results.
    Retracted { message_id: MessageId },
    /// The vote was already on the wire or acknowledged, so a compensating
    /// cast of the prior choice now flows through the normal flush cycle.
    Corrected {
        message_id: MessageId,
        choice: VoteChoice,
    },
    /// There was no cast to undo. A benign no-op, never an error.
    NothingToUndo,
}

#[derive(Debug, Clone)]
struct UndoEntry {
    message_id: MessageId,
    /// Effective choice right before the cast; `None` when the message had
    /// no buffered vote (it may have been acknowledged long ago).
    prior: Option<VoteChoice>,
}

/// Remembers the single most recent cast and the effective choice it
/// displaced.
///
/// Compensating casts are deliberately not recorded, which keeps undo a
/// single affordance; the next regular cast starts a fresh entry. Deeper
/// history would stack entries here instead of replacing the slot.
#[derive(Debug, Default)]
pub(crate) struct UndoLedger {
    last: Option<UndoEntry>,
}

impl UndoLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, message_id: MessageId, prior: Option<VoteChoice>) {
        self.last = Some(UndoEntry { message_id, prior });
    }

    /// Takes the undoable cast, leaving the ledger empty.
    pub(crate) fn take_last(&mut self) -> Option<(MessageId, Option<VoteChoice>)> {
        self.last.take().map(|entry| (entry.message_id, entry.prior))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_empties_the_ledger() {
        let mut ledger = UndoLedger::new();
        ledger.record(MessageId::from("m1"), Some(VoteChoice::Agree));

        assert_eq!(
            ledger.take_last(),
            Some((MessageId::from("m1"), Some(VoteChoice::Agree)))
        );
        assert_eq!(ledger.take_last(), None);
    }

    #[test]
    fn newer_cast_displaces_older_entry() {
        let mut ledger = UndoLedger::new();
        ledger.record(MessageId::from("m1"), None);
        ledger.record(MessageId::from("m2"), Some(VoteChoice::Skip));

        assert_eq!(
            ledger.take_last(),
            Some((MessageId::from("m2"), Some(VoteChoice::Skip)))
        );
        assert_eq!(ledger.take_last(), None);
    }
}
