use std::fmt;

use serde::{Deserialize, Serialize};

/// Negotiation state of a [`crate::peer_link::PeerLink`].
///
/// ```text
/// Idle -> Offering -> AwaitingAnswer -> Connected -> Closing -> Closed
/// ```
///
/// `Idle` and `Connected` are the stable states a link falls back to when a
/// negotiation step fails. Every non-closed state may move to `Closing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NegotiationState {
    Idle,
    Offering,
    AwaitingAnswer,
    Connected,
    Closing,
    Closed,
}

impl NegotiationState {
    pub fn is_stable(&self) -> bool {
        matches!(self, NegotiationState::Idle | NegotiationState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, NegotiationState::Closing | NegotiationState::Closed)
    }

    pub fn can_transition_to(&self, next: NegotiationState) -> bool {
        use NegotiationState::*;
        match (self, next) {
            (Closed, _) => false,
            (Closing, Closed) => true,
            (Closing, _) => false,
            (_, Closing) => true,
            (Idle, Offering) | (Connected, Offering) => true,
            (Offering, AwaitingAnswer) => true,
            (AwaitingAnswer, Offering) => true,
            // Answer applied, or a remote offer answered.
            (AwaitingAnswer, Connected) | (Idle, Connected) => true,
            // Failure back-edges to the last stable state.
            (Offering, Idle) | (Offering, Connected) => true,
            (AwaitingAnswer, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::AwaitingAnswer => "awaiting-answer",
            NegotiationState::Connected => "connected",
            NegotiationState::Closing => "closing",
            NegotiationState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}
