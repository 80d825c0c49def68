use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::session_description::RTCSessionDescription,
};

use crate::{error::Error, presence::PresenceRecord};

/// A negotiation message exchanged with one remote agent through the signaling relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Signal {
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    IceCandidate(RTCIceCandidateInit),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::IceCandidate(_) => SignalKind::IceCandidate,
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Signal, Error> {
        Ok(serde_json::from_str(data)?)
    }
}

impl SignalKind {
    /// Broadcast event name used on the relay channel for this kind.
    pub const fn event_name(&self) -> &'static str {
        match self {
            SignalKind::Offer => "agent-agent-offer-packet",
            SignalKind::Answer => "agent-agent-answer-packet",
            SignalKind::IceCandidate => "agent-agent-ice-candidate-packet",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::IceCandidate => write!(f, "ice candidate"),
        }
    }
}

/// Ordered, per-target delivery of [`Signal`]s to remote agents.
///
/// Inbound messages are handed to [`crate::world::WorldConnection::dispatch_signal`]
/// by whoever owns the relay subscription.
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    async fn send(&self, target_agent_id: &str, signal: Signal) -> Result<(), Error>;

    /// Releases the relay handle. Called once on shutdown.
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Publishes the local [`PresenceRecord`] to the rest of the world.
#[async_trait]
pub trait PresenceTransport: Send + Sync {
    async fn publish(&self, record: &PresenceRecord) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let mut offer = RTCSessionDescription::default();
        offer.sdp_type = RTCSdpType::Offer;
        offer.sdp = "v=0".to_string();

        let json = Signal::Offer(offer).to_json().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["kind"], "offer");
        assert_eq!(value["payload"]["type"], "offer");
        assert_eq!(value["payload"]["sdp"], "v=0");
    }

    #[test]
    fn test_ice_candidate_from_json() {
        let json = r#"{"kind":"iceCandidate","payload":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":null}}"#;
        let signal = Signal::from_json(json).expect("deserialize");
        assert_eq!(signal.kind(), SignalKind::IceCandidate);
        match signal {
            Signal::IceCandidate(candidate) => {
                assert_eq!(candidate.sdp_mid, Some("0".to_string()));
                assert!(candidate.candidate.starts_with("candidate:1"));
            }
            _ => panic!("expected ice candidate"),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Signal::from_json(r#"{"kind":"bye","payload":{}}"#).is_err());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(SignalKind::Offer.event_name(), "agent-agent-offer-packet");
        assert_eq!(SignalKind::Answer.event_name(), "agent-agent-answer-packet");
        assert_eq!(
            SignalKind::IceCandidate.event_name(),
            "agent-agent-ice-candidate-packet"
        );
    }
}
