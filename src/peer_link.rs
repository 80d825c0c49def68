use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use derivative::Derivative;
use tokio::sync::broadcast;
use uuid::Uuid;
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::session_description::RTCSessionDescription,
};

use crate::{
    channel::{AudioAttachment, ChannelEventSender, MediaProvider, PeerChannel, RemoteStream},
    error::{Error, NegotiationErrorKind},
    mesh::MeshEvent,
    negotiation::NegotiationState,
    presence::PresenceRecord,
    signal::{Signal, SignalingRelay},
};

/// Collaborators shared by every link of one mesh.
#[derive(Derivative)]
#[derivative(Clone, Debug)]
pub(crate) struct LinkResources {
    #[derivative(Debug = "ignore")]
    pub relay: Arc<dyn SignalingRelay>,
    #[derivative(Debug = "ignore")]
    pub media: Arc<dyn MediaProvider>,
    pub channel_event_sender: ChannelEventSender,
    pub mesh_event_sender: broadcast::Sender<MeshEvent>,
}

/// Negotiation state and owned resources for one remote agent.
///
/// A link never touches the mesh table. Its side effects are limited to sending
/// through the relay, releasing its channel and audio attachment, and its own fields.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PeerLink {
    pub id: String,
    pub agent_id: String,
    local_agent_id: String,
    state: NegotiationState,
    stable_state: NegotiationState,
    local_presence: PresenceRecord,
    remote_presence: Option<PresenceRecord>,
    // Local offer waiting for its answer.
    pending_offer: Option<RTCSessionDescription>,
    // Last answer produced for a remote offer, and the sdp of that offer.
    pending_answer: Option<RTCSessionDescription>,
    answered_offer: Option<String>,
    queued_candidates: VecDeque<RTCIceCandidateInit>,
    remote_description_applied: bool,
    renegotiation_requested: bool,
    connected: bool,
    #[derivative(Debug = "ignore")]
    channel: Option<Box<dyn PeerChannel>>,
    audio_attachment: Option<AudioAttachment>,
    resources: LinkResources,
}

impl PeerLink {
    pub(crate) fn new(
        agent_id: String,
        local_presence: PresenceRecord,
        remote_presence: Option<PresenceRecord>,
        resources: LinkResources,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        tracing::debug!("PeerLink {} is created for {}", id, agent_id);

        Self {
            id,
            agent_id,
            local_agent_id: local_presence.agent_id.clone(),
            state: NegotiationState::Idle,
            stable_state: NegotiationState::Idle,
            local_presence,
            remote_presence,
            pending_offer: None,
            pending_answer: None,
            answered_offer: None,
            queued_candidates: VecDeque::new(),
            remote_description_applied: false,
            renegotiation_requested: false,
            connected: false,
            channel: None,
            audio_attachment: None,
            resources,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn local_presence(&self) -> &PresenceRecord {
        &self.local_presence
    }

    pub fn remote_presence(&self) -> Option<&PresenceRecord> {
        self.remote_presence.as_ref()
    }

    pub fn audio_attachment(&self) -> Option<&AudioAttachment> {
        self.audio_attachment.as_ref()
    }

    pub fn pending_offer(&self) -> Option<&RTCSessionDescription> {
        self.pending_offer.as_ref()
    }

    pub fn pending_answer(&self) -> Option<&RTCSessionDescription> {
        self.pending_answer.as_ref()
    }

    pub fn queued_candidates(&self) -> &VecDeque<RTCIceCandidateInit> {
        &self.queued_candidates
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_applied
    }

    /// Starts (or restarts) negotiation from `Idle` or `Connected`.
    ///
    /// Requested while an offer is already outstanding, the renegotiation runs once
    /// the link is `Connected` again.
    pub async fn initiate_offer(&mut self) {
        match self.state {
            NegotiationState::Idle | NegotiationState::Connected => {}
            NegotiationState::Offering | NegotiationState::AwaitingAnswer => {
                tracing::debug!(
                    "offer to {} is outstanding, renegotiation deferred",
                    self.agent_id
                );
                self.renegotiation_requested = true;
                return;
            }
            NegotiationState::Closing | NegotiationState::Closed => {
                tracing::debug!("ignoring offer request for closed link {}", self.agent_id);
                return;
            }
        }

        let prior = self.state;
        if let Err(err) = self.ensure_channel().await {
            tracing::warn!("failed to create channel for {}: {}", self.agent_id, err);
            return;
        }

        self.transition(NegotiationState::Offering);
        let offer = match self.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                tracing::warn!("failed to create offer for {}: {}", self.agent_id, err);
                self.transition(prior);
                return;
            }
        };

        self.pending_offer = Some(offer.clone());
        self.transition(NegotiationState::AwaitingAnswer);

        tracing::debug!("sending offer to {}", self.agent_id);
        if let Err(err) = self
            .resources
            .relay
            .send(&self.agent_id, Signal::Offer(offer))
            .await
        {
            tracing::warn!("failed to send offer to {}: {}", self.agent_id, err);
            self.discard_local_offer().await;
            self.transition(prior);
        }
    }

    /// Answers a remote offer.
    ///
    /// On offer collision the agent with the smaller id discards its own offer and
    /// answers; the other keeps waiting for the answer to its own offer. An offer
    /// that was already answered gets the same answer again.
    pub async fn handle_offer(&mut self, offer: RTCSessionDescription) {
        match self.state {
            NegotiationState::Closing | NegotiationState::Closed => {
                tracing::debug!("dropping offer from {} on closed link", self.agent_id);
                return;
            }
            NegotiationState::Connected if self.is_answered(&offer) => {
                tracing::debug!("offer from {} is already answered", self.agent_id);
                self.resend_pending_answer().await;
                return;
            }
            NegotiationState::Offering | NegotiationState::AwaitingAnswer => {
                if self.local_agent_id < self.agent_id {
                    tracing::debug!(
                        "offer collision with {}, discarding local offer",
                        self.agent_id
                    );
                    self.discard_local_offer().await;
                    self.transition(self.stable_state);
                } else {
                    tracing::debug!(
                        "offer collision with {}, ignoring remote offer",
                        self.agent_id
                    );
                    self.resend_pending_offer().await;
                    return;
                }
            }
            NegotiationState::Idle | NegotiationState::Connected => {}
        }

        let offer_sdp = offer.sdp.clone();
        let answer = match self.answer(offer).await {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!("failed to answer offer from {}: {}", self.agent_id, err);
                return;
            }
        };

        self.remote_description_applied = true;
        self.flush_candidates().await;
        self.pending_answer = Some(answer.clone());
        self.answered_offer = Some(offer_sdp);
        self.transition(NegotiationState::Connected);

        tracing::debug!("sending answer to {}", self.agent_id);
        if let Err(err) = self
            .resources
            .relay
            .send(&self.agent_id, Signal::Answer(answer))
            .await
        {
            tracing::warn!("failed to send answer to {}: {}", self.agent_id, err);
        }

        self.run_deferred_renegotiation().await;
    }

    pub async fn handle_answer(&mut self, answer: RTCSessionDescription) {
        if self.state != NegotiationState::AwaitingAnswer {
            tracing::debug!(
                "dropping answer from {} in state {}",
                self.agent_id,
                self.state
            );
            return;
        }

        if let Err(err) = self.apply_answer(answer).await {
            tracing::warn!("failed to apply answer from {}: {}", self.agent_id, err);
            self.discard_local_offer().await;
            self.transition(self.stable_state);
            return;
        }

        self.pending_offer = None;
        self.remote_description_applied = true;
        self.flush_candidates().await;
        self.transition(NegotiationState::Connected);

        self.run_deferred_renegotiation().await;
    }

    pub async fn handle_ice_candidate(&mut self, candidate: RTCIceCandidateInit) {
        if self.state.is_closed() {
            tracing::debug!("dropping ice candidate from {} on closed link", self.agent_id);
            return;
        }

        if self.remote_description_applied {
            if let Err(err) = self.add_ice_candidate(candidate).await {
                tracing::warn!("failed to add ice candidate from {}: {}", self.agent_id, err);
            }
        } else {
            tracing::debug!("pending ice candidate from {}", self.agent_id);
            self.queued_candidates.push_back(candidate);
        }
    }

    /// Closes the link and releases its channel and audio attachment. Idempotent.
    pub async fn terminate(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.transition(NegotiationState::Closing);

        self.queued_candidates.clear();
        self.pending_offer = None;
        self.pending_answer = None;
        self.answered_offer = None;
        self.renegotiation_requested = false;

        if let Some(attachment) = self.audio_attachment.take() {
            self.resources.media.release_audio(attachment).await;
        }
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.close().await {
                tracing::warn!("failed to close channel for {}: {}", self.agent_id, err);
            }
        }
        self.set_connected(false);

        self.transition(NegotiationState::Closed);
    }

    /// Attaches a remote audio stream, releasing the previous attachment if any.
    pub async fn attach_audio(&mut self, stream: &RemoteStream) -> Result<(), Error> {
        if self.state.is_closed() {
            tracing::debug!("ignoring audio for closed link {}", self.agent_id);
            return Ok(());
        }

        let attachment = self
            .resources
            .media
            .attach_audio(&self.agent_id, stream)
            .await?;
        tracing::info!(
            "audio {} is attached for {}",
            attachment.id,
            self.agent_id
        );
        if let Some(previous) = self.audio_attachment.replace(attachment) {
            tracing::debug!(
                "releasing audio {} for {}, replaced by a new stream",
                previous.id,
                self.agent_id
            );
            self.resources.media.release_audio(previous).await;
        }
        Ok(())
    }

    pub async fn send_data(&self, data: Bytes) -> Result<(), Error> {
        self.channel_ref()?.send_data(data).await
    }

    pub(crate) fn set_local_presence(&mut self, record: PresenceRecord) {
        self.local_presence = record;
    }

    /// Returns false when `record` is older than the snapshot already held.
    pub(crate) fn set_remote_presence(&mut self, record: PresenceRecord) -> bool {
        match &self.remote_presence {
            Some(current) if !record.is_newer_than(current) => false,
            _ => {
                self.remote_presence = Some(record);
                true
            }
        }
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        tracing::info!(
            "PeerLink {} connectivity changed: connected={}",
            self.agent_id,
            connected
        );
        let _ = self
            .resources
            .mesh_event_sender
            .send(MeshEvent::ConnectivityChanged {
                agent_id: self.agent_id.clone(),
                connected,
            });
    }

    fn transition(&mut self, next: NegotiationState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            debug_assert!(false, "invalid transition {} -> {}", self.state, next);
            tracing::error!(
                "PeerLink {} refused transition {} -> {}",
                self.agent_id,
                self.state,
                next
            );
            return;
        }

        let from = self.state;
        self.state = next;
        if next.is_stable() {
            self.stable_state = next;
        }
        tracing::debug!("PeerLink {} state {} -> {}", self.agent_id, from, next);
        let _ = self
            .resources
            .mesh_event_sender
            .send(MeshEvent::LinkStateChanged {
                agent_id: self.agent_id.clone(),
                from,
                to: next,
            });
    }

    // The remote side may have dropped our offer before it knew about us.
    async fn resend_pending_offer(&self) {
        let Some(offer) = self.pending_offer.clone() else {
            return;
        };
        tracing::debug!("resending offer to {}", self.agent_id);
        if let Err(err) = self
            .resources
            .relay
            .send(&self.agent_id, Signal::Offer(offer))
            .await
        {
            tracing::warn!("failed to resend offer to {}: {}", self.agent_id, err);
        }
    }

    async fn resend_pending_answer(&self) {
        let Some(answer) = self.pending_answer.clone() else {
            return;
        };
        tracing::debug!("resending answer to {}", self.agent_id);
        if let Err(err) = self
            .resources
            .relay
            .send(&self.agent_id, Signal::Answer(answer))
            .await
        {
            tracing::warn!("failed to resend answer to {}: {}", self.agent_id, err);
        }
    }

    fn is_answered(&self, offer: &RTCSessionDescription) -> bool {
        self.pending_answer.is_some() && self.answered_offer.as_deref() == Some(offer.sdp.as_str())
    }

    async fn run_deferred_renegotiation(&mut self) {
        if self.renegotiation_requested && self.state == NegotiationState::Connected {
            self.renegotiation_requested = false;
            tracing::debug!("running deferred renegotiation with {}", self.agent_id);
            self.initiate_offer().await;
        }
    }

    async fn ensure_channel(&mut self) -> Result<(), Error> {
        if self.channel.is_none() {
            let channel = self
                .resources
                .media
                .create_channel(
                    &self.agent_id,
                    &self.id,
                    self.resources.channel_event_sender.clone(),
                )
                .await?;
            self.channel = Some(channel);
        }
        Ok(())
    }

    fn channel_ref(&self) -> Result<&dyn PeerChannel, Error> {
        self.channel.as_deref().ok_or(Error::new_negotiation(
            format!("channel for {} does not exist", self.agent_id),
            NegotiationErrorKind::PeerConnectionError,
        ))
    }

    async fn create_offer(&self) -> Result<RTCSessionDescription, Error> {
        self.channel_ref()?.create_offer().await
    }

    async fn answer(
        &mut self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, Error> {
        self.ensure_channel().await?;
        self.channel_ref()?.create_answer(offer).await
    }

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), Error> {
        self.channel_ref()?.apply_answer(answer).await
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error> {
        self.channel_ref()?.add_ice_candidate(candidate).await
    }

    async fn discard_local_offer(&mut self) {
        self.pending_offer = None;
        if let Ok(channel) = self.channel_ref() {
            if let Err(err) = channel.rollback().await {
                tracing::warn!("failed to roll back offer to {}: {}", self.agent_id, err);
            }
        }
    }

    async fn flush_candidates(&mut self) {
        while let Some(candidate) = self.queued_candidates.pop_front() {
            tracing::debug!("adding pending ice candidate from {}", self.agent_id);
            if let Err(err) = self.add_ice_candidate(candidate).await {
                tracing::warn!("failed to add ice candidate from {}: {}", self.agent_id, err);
            }
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        tracing::debug!("PeerLink {} is dropped", self.id);
    }
}
