//! Ceremony state machine.
//!
//! Every registration or authentication request drives one machine through
//! the ceremony lifecycle. Each transition is hashed with BLAKE3 and kept
//! in a bounded history for audit.
//!
//! # State Transitions
//!
//! ```text
//! Idle
//!     ↓ (challenge issued, or session restored at finish)
//! ChallengeIssued
//!     ↓ (authenticator response received)
//! ResponseReceived
//!     ↓ (signature, counters and proof verified)
//! Verified
//!     ↓ (ledger write)
//! Committed
//! ```
//!
//! `VerifiedFailed` is reachable from any non-terminal state. `Expired` is
//! reachable from `Idle` and `ChallengeIssued`, when the session could not
//! be consumed.

use crate::error::{CeremonyError, CeremonyResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use zkpass_core::current_timestamp;

/// Maximum number of state transitions to track in history.
const MAX_HISTORY_SIZE: usize = 100;

/// Which ceremony a machine is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl CeremonyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CeremonyKind::Registration => "registration",
            CeremonyKind::Authentication => "authentication",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CeremonyState {
    Idle,

    ChallengeIssued {
        /// BLAKE3 of the challenge, never the challenge itself
        challenge_hash: Vec<u8>,
        issued_at: u64,
    },

    ResponseReceived {
        credential: String,
        received_at: u64,
    },

    Verified {
        credential: String,
        verified_at: u64,
    },

    Committed {
        credential: String,
        committed_at: u64,
    },

    VerifiedFailed {
        code: String,
        failed_at: u64,
    },

    Expired {
        expired_at: u64,
    },
}

impl CeremonyState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CeremonyState::Committed { .. }
                | CeremonyState::VerifiedFailed { .. }
                | CeremonyState::Expired { .. }
        )
    }

    fn name(&self) -> &'static str {
        match self {
            CeremonyState::Idle => "Idle",
            CeremonyState::ChallengeIssued { .. } => "ChallengeIssued",
            CeremonyState::ResponseReceived { .. } => "ResponseReceived",
            CeremonyState::Verified { .. } => "Verified",
            CeremonyState::Committed { .. } => "Committed",
            CeremonyState::VerifiedFailed { .. } => "VerifiedFailed",
            CeremonyState::Expired { .. } => "Expired",
        }
    }
}

/// Record of a state transition for audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: String,
    pub to_state: String,
    pub timestamp: u64,
    pub reason: Option<String>,
    pub transition_hash: Vec<u8>,
}

pub struct CeremonyStateMachine {
    kind: CeremonyKind,
    /// Ceremony key fingerprint, for logs
    ceremony: String,
    current_state: CeremonyState,
    history: VecDeque<StateTransition>,
}

impl CeremonyStateMachine {
    pub fn new(kind: CeremonyKind, ceremony: impl Into<String>) -> Self {
        Self {
            kind,
            ceremony: ceremony.into(),
            current_state: CeremonyState::Idle,
            history: VecDeque::with_capacity(8),
        }
    }

    pub fn kind(&self) -> CeremonyKind {
        self.kind
    }

    pub fn current_state(&self) -> &CeremonyState {
        &self.current_state
    }

    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Hash of the most recent transition, hex encoded.
    pub fn last_transition_hash(&self) -> Option<String> {
        self.history
            .back()
            .map(|t| hex::encode(&t.transition_hash))
    }

    /// Transition: Idle → ChallengeIssued
    pub fn on_challenge_issued(&mut self, challenge: &[u8]) -> CeremonyResult<()> {
        match self.current_state {
            CeremonyState::Idle => {
                let new_state = CeremonyState::ChallengeIssued {
                    challenge_hash: blake3::hash(challenge).as_bytes().to_vec(),
                    issued_at: current_timestamp(),
                };
                self.transition(new_state, None);
                Ok(())
            }
            _ => Err(self.invalid("ChallengeIssued")),
        }
    }

    /// Transition: ChallengeIssued → ResponseReceived
    pub fn on_response_received(&mut self, credential: String) -> CeremonyResult<()> {
        match self.current_state {
            CeremonyState::ChallengeIssued { .. } => {
                let new_state = CeremonyState::ResponseReceived {
                    credential,
                    received_at: current_timestamp(),
                };
                self.transition(new_state, None);
                Ok(())
            }
            _ => Err(self.invalid("ResponseReceived")),
        }
    }

    /// Transition: ResponseReceived → Verified
    pub fn on_verified(&mut self) -> CeremonyResult<()> {
        match &self.current_state {
            CeremonyState::ResponseReceived { credential, .. } => {
                let new_state = CeremonyState::Verified {
                    credential: credential.clone(),
                    verified_at: current_timestamp(),
                };
                self.transition(new_state, None);
                Ok(())
            }
            _ => Err(self.invalid("Verified")),
        }
    }

    /// Transition: Verified → Committed
    pub fn on_committed(&mut self) -> CeremonyResult<()> {
        match &self.current_state {
            CeremonyState::Verified { credential, .. } => {
                let new_state = CeremonyState::Committed {
                    credential: credential.clone(),
                    committed_at: current_timestamp(),
                };
                self.transition(new_state, None);
                Ok(())
            }
            _ => Err(self.invalid("Committed")),
        }
    }

    /// Transition: any non-terminal → VerifiedFailed, or Idle/ChallengeIssued → Expired
    /// for session expiry. A machine already in a terminal state is left alone.
    pub fn on_failure(&mut self, error: &CeremonyError) {
        if self.current_state.is_terminal() {
            return;
        }

        let now = current_timestamp();
        let expired = matches!(error, CeremonyError::SessionExpired)
            && matches!(
                self.current_state,
                CeremonyState::Idle | CeremonyState::ChallengeIssued { .. }
            );

        let new_state = if expired {
            CeremonyState::Expired { expired_at: now }
        } else {
            CeremonyState::VerifiedFailed {
                code: error.code().to_string(),
                failed_at: now,
            }
        };
        self.transition(new_state, Some(error.to_string()));
    }

    fn invalid(&self, target: &str) -> CeremonyError {
        CeremonyError::Internal(format!(
            "invalid {} transition {} -> {}",
            self.kind.as_str(),
            self.current_state.name(),
            target
        ))
    }

    fn transition(&mut self, new_state: CeremonyState, reason: Option<String>) {
        let now = current_timestamp();

        let from_state_str = format!("{:?}", self.current_state);
        let to_state_str = format!("{:?}", new_state);

        let transition_data = format!(
            "{}:{}:{}->{};{}",
            self.kind.as_str(),
            self.ceremony,
            from_state_str,
            to_state_str,
            now
        );
        let transition_hash = blake3::hash(transition_data.as_bytes()).as_bytes().to_vec();

        debug!(
            ceremony = %self.ceremony,
            kind = self.kind.as_str(),
            from = self.current_state.name(),
            to = new_state.name(),
            "Ceremony transition"
        );

        let transition = StateTransition {
            from_state: from_state_str,
            to_state: to_state_str,
            timestamp: now,
            reason,
            transition_hash,
        };

        self.current_state = new_state;

        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition);
    }
}
