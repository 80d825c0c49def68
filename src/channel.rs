use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::session_description::RTCSessionDescription,
};

use crate::{error::Error, spatializer::RelativeOffset};

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;
pub type ChannelEventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Events raised by a [`PeerChannel`] outside of any negotiation call.
///
/// Every event names the channel it came from, so events still queued from a
/// closed channel can be told apart from those of its replacement.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    /// A local ICE candidate to trickle to the remote agent.
    LocalCandidate {
        agent_id: String,
        channel_id: String,
        candidate: RTCIceCandidateInit,
    },
    /// A remote audio stream arrived and can be attached.
    RemoteAudio {
        agent_id: String,
        stream: RemoteStream,
    },
    Connectivity {
        agent_id: String,
        channel_id: String,
        connected: bool,
    },
    Data {
        agent_id: String,
        channel_id: String,
        data: Bytes,
    },
}

impl ChannelEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            ChannelEvent::LocalCandidate { agent_id, .. }
            | ChannelEvent::RemoteAudio { agent_id, .. }
            | ChannelEvent::Connectivity { agent_id, .. }
            | ChannelEvent::Data { agent_id, .. } => agent_id,
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            ChannelEvent::LocalCandidate { channel_id, .. }
            | ChannelEvent::Connectivity { channel_id, .. }
            | ChannelEvent::Data { channel_id, .. } => channel_id,
            ChannelEvent::RemoteAudio { stream, .. } => &stream.channel_id,
        }
    }
}

/// Opaque reference to a remote media stream held by the [`MediaProvider`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteStream {
    pub id: String,
    /// The channel the stream arrived on.
    pub channel_id: String,
}

/// Opaque handle of an audio placement node owned by the [`MediaProvider`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AudioAttachment {
    pub id: String,
    pub agent_id: String,
}

/// The real-time channel to one remote agent.
///
/// Every method that produces a description also installs it as the local
/// description, so the caller only has to forward the result.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    async fn create_offer(&self) -> Result<RTCSessionDescription, Error>;

    /// Applies a remote offer and returns the local answer.
    async fn create_answer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, Error>;

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), Error>;

    /// Discards the outstanding local offer.
    async fn rollback(&self) -> Result<(), Error>;

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error>;

    async fn send_data(&self, data: Bytes) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// Creates channels and owns the audio placement nodes attached to them.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Opens a channel to `agent_id`. Events it raises carry `channel_id`.
    async fn create_channel(
        &self,
        agent_id: &str,
        channel_id: &str,
        events: ChannelEventSender,
    ) -> Result<Box<dyn PeerChannel>, Error>;

    async fn attach_audio(
        &self,
        agent_id: &str,
        stream: &RemoteStream,
    ) -> Result<AudioAttachment, Error>;

    async fn place_audio(&self, attachment: &AudioAttachment, offset: &RelativeOffset);

    async fn release_audio(&self, attachment: AudioAttachment);
}
