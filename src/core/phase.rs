//! Protocol phases and the forward-only transition rule.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// The mutually exclusive states a session occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Handshake,
    Status,
    Login,
    Play,
}

impl Phase {
    /// Map the `next_phase` field of a handshake onto a phase
    pub fn from_handshake_intent(intent: i32) -> Option<Self> {
        match intent {
            1 => Some(Phase::Status),
            2 => Some(Phase::Login),
            _ => None,
        }
    }

    /// Phases before Play, where a disconnect reason can still be shown to the client
    pub fn is_pre_play(self) -> bool {
        matches!(self, Phase::Handshake | Phase::Login)
    }

    /// Whether moving from `self` to `next` keeps the phase moving forward
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Handshake, Phase::Status)
                | (Phase::Handshake, Phase::Login)
                | (Phase::Login, Phase::Play)
        )
    }

    /// Validate a transition, returning the new phase
    pub fn advance(self, next: Phase) -> Result<Phase> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(ProtocolError::InvalidPhaseTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Handshake => "handshake",
            Phase::Status => "status",
            Phase::Login => "login",
            Phase::Play => "play",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
