//! Negotiation states and roles.

use std::fmt;

/// Session negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// No negotiation in progress (fresh or rolled back session)
    Idle,
    /// Local offer is being produced
    Offering,
    /// Offer sent, waiting for the answer
    AwaitingRemote,
    /// Remote description applied, completing the exchange
    Negotiating,
    /// Both descriptions committed
    Established,
    /// Call ended normally (terminal)
    Ended,
    /// Negotiation failed (terminal)
    Failed,
}

impl NegotiationState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Ended | NegotiationState::Failed)
    }

    /// Whether a local offer is outstanding (glare window)
    pub fn has_local_offer(&self) -> bool {
        matches!(
            self,
            NegotiationState::Offering | NegotiationState::AwaitingRemote
        )
    }

    /// Lowercase name for logs
    pub fn name(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::AwaitingRemote => "awaiting-remote",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Established => "established",
            NegotiationState::Ended => "ended",
            NegotiationState::Failed => "failed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of the exchange this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the offer
    Initiator,
    /// Answers the remote offer
    Responder,
    /// Session exists only because early fragments arrived
    Undetermined,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
            Role::Undetermined => write!(f, "undetermined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(NegotiationState::Ended.is_terminal());
        assert!(NegotiationState::Failed.is_terminal());
        assert!(!NegotiationState::Established.is_terminal());
    }

    #[test]
    fn test_glare_window() {
        assert!(NegotiationState::Offering.has_local_offer());
        assert!(NegotiationState::AwaitingRemote.has_local_offer());
        assert!(!NegotiationState::Negotiating.has_local_offer());
        assert!(!NegotiationState::Idle.has_local_offer());
    }
}
