//! Crash-safe persistence of buffered votes across sessions.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vote::PendingVote;

/// Errors that can occur when reading or writing the vote journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Failed to read journal '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write journal '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Journal '{path}' is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode journal state: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// The effective pending list at save time, oldest first.
///
/// Sync sub-state is intentionally absent: restored votes always re-enter as
/// pending, and idempotent vote ids make re-sending a vote the server already
/// accepted harmless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalState {
    pub votes: Vec<PendingVote>,
}

/// Persistence seam for the pending-vote store.
///
/// `save` is called after every store mutation, `load` once at startup.
/// Implementations must tolerate both being called from async tasks; writes
/// are expected to be small and fast.
pub trait VoteJournal: Send + Sync {
    fn load(&self) -> Result<JournalState, JournalError>;
    fn save(&self, state: &JournalState) -> Result<(), JournalError>;
}

/// JSON-file journal with atomic replace-on-save.
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the default journal location.
    ///
    /// Uses `~/.local/share/votedeck/journal.json` on Linux, or equivalent
    /// on other platforms via `dirs::data_dir()`. Falls back to the current
    /// directory if data_dir is unavailable.
    pub fn default_path() -> PathBuf {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        data_dir.join("votedeck").join("journal.json")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl VoteJournal for FileJournal {
    fn load(&self) -> Result<JournalState, JournalError> {
        if !self.path.exists() {
            return Ok(JournalState::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| JournalError::Read {
            path: self.path.clone(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| JournalError::Decode {
            path: self.path.clone(),
            source: e,
        })
    }

    fn save(&self, state: &JournalState) -> Result<(), JournalError> {
        let content =
            serde_json::to_string(state).map_err(|e| JournalError::Encode { source: e })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| JournalError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        }

        // Write to a sibling temp file and rename so a crash mid-write never
        // leaves a truncated journal behind.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).map_err(|e| JournalError::Write {
            path: tmp.clone(),
            source: e,
        })?;

        fs::rename(&tmp, &self.path).map_err(|e| JournalError::Write {
            path: self.path.clone(),
            source: e,
        })
    }
}
