use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::audio::ChunkStatus;
use crate::error::SessionError;

/// Lifecycle of a recording session.
///
/// `Idle -> Recording -> Finalizing -> Saved`, or `Idle -> Aborted` when the
/// device cannot be acquired. `Saved` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
    Finalizing,
    Saved,
    Aborted,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Recording)
                | (Idle, Aborted)
                | (Recording, Finalizing)
                | (Recording, Aborted)
                | (Finalizing, Saved)
                | (Finalizing, Aborted)
        )
    }

    /// Move to `next`, or fail with `InvalidState` naming `action`.
    pub fn transition(
        &mut self,
        next: SessionState,
        action: &'static str,
    ) -> Result<(), SessionError> {
        if !self.can_transition_to(next) {
            return Err(SessionError::InvalidState {
                from: *self,
                action,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Finalizing => "finalizing",
            SessionState::Saved => "saved",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Status of every chunk the session started, by chunk number.
#[derive(Debug, Clone, Default)]
pub struct ChunkLedger {
    chunks: BTreeMap<u32, ChunkStatus>,
}

impl ChunkLedger {
    pub fn set(&mut self, chunk_number: u32, status: ChunkStatus) {
        self.chunks.insert(chunk_number, status);
    }

    /// Forget a chunk that was discarded without being submitted.
    pub fn discard(&mut self, chunk_number: u32) {
        self.chunks.remove(&chunk_number);
    }

    pub fn status(&self, chunk_number: u32) -> Option<ChunkStatus> {
        self.chunks.get(&chunk_number).copied()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn count(&self, status: ChunkStatus) -> usize {
        self.chunks.values().filter(|s| **s == status).count()
    }

    pub fn with_status(&self, status: ChunkStatus) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(n, _)| *n)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, ChunkStatus)> + '_ {
        self.chunks.iter().map(|(n, s)| (*n, *s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_transitions_are_allowed() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Recording));
        assert!(Idle.can_transition_to(Aborted));
        assert!(Recording.can_transition_to(Finalizing));
        assert!(Finalizing.can_transition_to(Saved));
        assert!(!Saved.can_transition_to(Recording));
        assert!(!Aborted.can_transition_to(Recording));
        assert!(!Idle.can_transition_to(Saved));
        assert!(!Finalizing.can_transition_to(Recording));
    }

    #[test]
    fn transition_rejects_backwards_moves() {
        let mut state = SessionState::Idle;
        state.transition(SessionState::Recording, "start").unwrap();
        state.transition(SessionState::Finalizing, "stop").unwrap();
        state.transition(SessionState::Saved, "finalize").unwrap();

        let err = state.transition(SessionState::Recording, "start").unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                from: SessionState::Saved,
                action: "start"
            }
        ));
        assert_eq!(state, SessionState::Saved);
    }

    #[test]
    fn ledger_counts_by_status() {
        let mut ledger = ChunkLedger::default();
        ledger.set(1, ChunkStatus::Uploaded);
        ledger.set(2, ChunkStatus::Failed);
        ledger.set(3, ChunkStatus::Recording);
        ledger.set(3, ChunkStatus::Uploaded);
        assert_eq!(ledger.count(ChunkStatus::Uploaded), 2);
        assert_eq!(ledger.with_status(ChunkStatus::Failed), vec![2]);
        ledger.discard(3);
        assert_eq!(ledger.len(), 2);
    }
}
