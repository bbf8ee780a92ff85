//! Core vote types shared by the store, scheduler, and sync client.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A reaction the user can record on a statement.
///
/// The wire encoding is a signed integer so batches stay compact:
/// `Skip = 0`, `Disagree = -1`, `Agree = 1`, `Superlike = 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum VoteChoice {
    /// No opinion / card dismissed.
    Skip,
    /// Thumbs-down.
    Disagree,
    /// Thumbs-up.
    Agree,
    /// Strong agree (heart).
    Superlike,
}

/// A numeric value that does not map to any [`VoteChoice`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown vote choice value {0}")]
pub struct ChoiceError(pub i8);

impl VoteChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteChoice::Skip => "skip",
            VoteChoice::Disagree => "disagree",
            VoteChoice::Agree => "agree",
            VoteChoice::Superlike => "superlike",
        }
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VoteChoice> for i8 {
    fn from(choice: VoteChoice) -> i8 {
        match choice {
            VoteChoice::Skip => 0,
            VoteChoice::Disagree => -1,
            VoteChoice::Agree => 1,
            VoteChoice::Superlike => 2,
        }
    }
}

impl TryFrom<i8> for VoteChoice {
    type Error = ChoiceError;

    fn try_from(value: i8) -> Result<Self, ChoiceError> {
        match value {
            0 => Ok(VoteChoice::Skip),
            -1 => Ok(VoteChoice::Disagree),
            1 => Ok(VoteChoice::Agree),
            2 => Ok(VoteChoice::Superlike),
            other => Err(ChoiceError(other)),
        }
    }
}

/// Identifier of the statement a vote applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Vote-level idempotency key.
///
/// Assigned once at cast time and never reused, even when the vote it labels
/// is replaced or undone, so a stale in-flight request can always be
/// identified and ignored server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteId(Uuid);

impl VoteId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Batch-level identifier, distinct from individual vote ids. Used for
/// server-side logging and batch idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Snapshot of contextual attributes (region, session and group identifiers)
/// captured at cast time. The engine copies it onto the wire verbatim and
/// never interprets the contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserContext(serde_json::Map<String, serde_json::Value>);

impl UserContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Supplies the context snapshot attached to each vote at cast time.
///
/// The provider is an external collaborator: the engine asks for a fresh
/// snapshot on every cast so the server sees the context the user actually
/// had when voting, even if it changes later in the session.
pub trait ContextProvider: Send + Sync {
    fn snapshot(&self) -> UserContext;
}

/// Provider for embedders whose context is fixed for the whole session.
#[derive(Debug, Clone, Default)]
pub struct StaticContext(UserContext);

impl StaticContext {
    pub fn new(context: UserContext) -> Self {
        Self(context)
    }
}

impl ContextProvider for StaticContext {
    fn snapshot(&self) -> UserContext {
        self.0.clone()
    }
}

/// Sync sub-state of a buffered vote.
///
/// `InFlight` votes are part of an outstanding batch request; they are
/// excluded from future batches until acknowledged or requeued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VoteState {
    #[default]
    Pending,
    InFlight,
}

/// One user decision awaiting server acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVote {
    pub id: VoteId,
    pub message_id: MessageId,
    pub choice: VoteChoice,
    /// Client timestamp in milliseconds since the Unix epoch, strictly
    /// increasing within a session.
    pub created_at: u64,
    pub user_context: UserContext,
    /// Not persisted: restored votes always re-enter as pending.
    #[serde(skip, default)]
    pub state: VoteState,
}

impl PendingVote {
    pub fn is_in_flight(&self) -> bool {
        self.state == VoteState::InFlight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_wire_values() {
        assert_eq!(i8::from(VoteChoice::Skip), 0);
        assert_eq!(i8::from(VoteChoice::Disagree), -1);
        assert_eq!(i8::from(VoteChoice::Agree), 1);
        assert_eq!(i8::from(VoteChoice::Superlike), 2);
    }

    #[test]
    fn choice_decodes_from_wire() {
        assert_eq!(VoteChoice::try_from(-1), Ok(VoteChoice::Disagree));
        assert_eq!(VoteChoice::try_from(2), Ok(VoteChoice::Superlike));
        assert_eq!(VoteChoice::try_from(7), Err(ChoiceError(7)));
    }

    #[test]
    fn choice_serializes_as_number() {
        let json = serde_json::to_string(&VoteChoice::Superlike).unwrap();
        assert_eq!(json, "2");

        let parsed: VoteChoice = serde_json::from_str("-1").unwrap();
        assert_eq!(parsed, VoteChoice::Disagree);

        assert!(serde_json::from_str::<VoteChoice>("9").is_err());
    }

    #[test]
    fn user_context_is_transparent_json() {
        let context = UserContext::new()
            .with("region", "pdx")
            .with("groupId", 4);

        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json, serde_json::json!({"region": "pdx", "groupId": 4}));

        let back: UserContext = serde_json::from_value(json).unwrap();
        assert_eq!(back.get("region"), Some(&serde_json::json!("pdx")));
    }

    #[test]
    fn pending_vote_state_not_serialized() {
        let vote = PendingVote {
            id: VoteId::new(),
            message_id: MessageId::from("m1"),
            choice: VoteChoice::Agree,
            created_at: 42,
            user_context: UserContext::new(),
            state: VoteState::InFlight,
        };

        let json = serde_json::to_string(&vote).unwrap();
        assert!(!json.contains("state"));

        let back: PendingVote = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, VoteState::Pending);
        assert_eq!(back.id, vote.id);
    }
}
