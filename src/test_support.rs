use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
};

use crate::{
    channel::{AudioAttachment, ChannelEventSender, MediaProvider, PeerChannel, RemoteStream},
    error::{Error, MediaErrorKind, NegotiationErrorKind, SignalingErrorKind},
    presence::PresenceRecord,
    signal::{PresenceTransport, Signal, SignalingRelay},
    spatializer::RelativeOffset,
};

pub(crate) fn description(sdp_type: RTCSdpType, sdp: &str) -> RTCSessionDescription {
    let mut description = RTCSessionDescription::default();
    description.sdp_type = sdp_type;
    description.sdp = sdp.to_string();
    description
}

pub(crate) fn candidate(name: &str) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: name.to_string(),
        ..Default::default()
    }
}

#[derive(Default)]
pub(crate) struct RecordingRelay {
    sent: Mutex<Vec<(String, Signal)>>,
    fail: AtomicBool,
    pub closed: AtomicBool,
}

impl RecordingRelay {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<(String, Signal)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn take(&self) -> Vec<(String, Signal)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub(crate) fn count(&self, target: &str, kind: crate::signal::SignalKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, signal)| to == target && signal.kind() == kind)
            .count()
    }
}

#[async_trait]
impl SignalingRelay for RecordingRelay {
    async fn send(&self, target_agent_id: &str, signal: Signal) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::new_signaling(
                "relay is failing".to_string(),
                SignalingErrorKind::SendError,
            ));
        }
        self.sent
            .lock()
            .unwrap()
            .push((target_agent_id.to_string(), signal));
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingPresence {
    published: Mutex<Vec<PresenceRecord>>,
    fail: AtomicBool,
    pub closed: AtomicBool,
}

impl RecordingPresence {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn published(&self) -> Vec<PresenceRecord> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl PresenceTransport for RecordingPresence {
    async fn publish(&self, record: &PresenceRecord) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::new_signaling(
                "presence transport is failing".to_string(),
                SignalingErrorKind::PublishError,
            ));
        }
        self.published.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeFlags {
    pub fail_channel: AtomicBool,
    pub fail_offer: AtomicBool,
    pub fail_answer: AtomicBool,
    pub fail_apply: AtomicBool,
}

/// What a fake channel has been asked to do.
#[derive(Default)]
pub(crate) struct FakeChannelState {
    pub channel_id: String,
    pub offers_created: AtomicUsize,
    pub remote_descriptions: Mutex<Vec<RTCSessionDescription>>,
    pub applied_candidates: Mutex<Vec<String>>,
    pub rollbacks: AtomicUsize,
    pub sent_data: Mutex<Vec<Bytes>>,
    pub closed: AtomicBool,
}

impl FakeChannelState {
    pub(crate) fn applied_candidates(&self) -> Vec<String> {
        self.applied_candidates.lock().unwrap().clone()
    }

    pub(crate) fn remote_sdps(&self) -> Vec<String> {
        self.remote_descriptions
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.sdp.clone())
            .collect()
    }
}

struct FakeChannel {
    local_agent_id: String,
    agent_id: String,
    state: Arc<FakeChannelState>,
    flags: Arc<FakeFlags>,
}

#[async_trait]
impl PeerChannel for FakeChannel {
    async fn create_offer(&self) -> Result<RTCSessionDescription, Error> {
        if self.flags.fail_offer.load(Ordering::SeqCst) {
            return Err(Error::new_negotiation(
                "offer failed".to_string(),
                NegotiationErrorKind::LocalDescriptionError,
            ));
        }
        let n = self.state.offers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(description(
            RTCSdpType::Offer,
            &format!("offer:{}->{}:{}", self.local_agent_id, self.agent_id, n),
        ))
    }

    async fn create_answer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, Error> {
        if self.flags.fail_answer.load(Ordering::SeqCst) {
            return Err(Error::new_negotiation(
                "answer failed".to_string(),
                NegotiationErrorKind::RemoteDescriptionError,
            ));
        }
        let answer = format!("answer:{}->{}:{}", self.local_agent_id, self.agent_id, offer.sdp);
        self.state.remote_descriptions.lock().unwrap().push(offer);
        Ok(description(RTCSdpType::Answer, &answer))
    }

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), Error> {
        if self.flags.fail_apply.load(Ordering::SeqCst) {
            return Err(Error::new_negotiation(
                "apply failed".to_string(),
                NegotiationErrorKind::RemoteDescriptionError,
            ));
        }
        self.state.remote_descriptions.lock().unwrap().push(answer);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Error> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error> {
        if self.state.remote_descriptions.lock().unwrap().is_empty() {
            return Err(Error::new_negotiation(
                "remote description not set".to_string(),
                NegotiationErrorKind::ICECandidateError,
            ));
        }
        self.state
            .applied_candidates
            .lock()
            .unwrap()
            .push(candidate.candidate);
        Ok(())
    }

    async fn send_data(&self, data: Bytes) -> Result<(), Error> {
        self.state.sent_data.lock().unwrap().push(data);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct FakeMedia {
    local_agent_id: String,
    pub flags: Arc<FakeFlags>,
    channels: Mutex<HashMap<String, Arc<FakeChannelState>>>,
    placements: Mutex<Vec<(AudioAttachment, RelativeOffset)>>,
    released: Mutex<Vec<AudioAttachment>>,
    attachments_created: AtomicUsize,
}

impl FakeMedia {
    pub(crate) fn new(local_agent_id: &str) -> Arc<Self> {
        Arc::new(Self {
            local_agent_id: local_agent_id.to_string(),
            flags: Arc::new(FakeFlags::default()),
            channels: Mutex::new(HashMap::new()),
            placements: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            attachments_created: AtomicUsize::new(0),
        })
    }

    pub(crate) fn channel(&self, agent_id: &str) -> Option<Arc<FakeChannelState>> {
        self.channels.lock().unwrap().get(agent_id).cloned()
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub(crate) fn placements(&self) -> Vec<(AudioAttachment, RelativeOffset)> {
        self.placements.lock().unwrap().clone()
    }

    pub(crate) fn released(&self) -> Vec<AudioAttachment> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaProvider for FakeMedia {
    async fn create_channel(
        &self,
        agent_id: &str,
        channel_id: &str,
        _events: ChannelEventSender,
    ) -> Result<Box<dyn PeerChannel>, Error> {
        if self.flags.fail_channel.load(Ordering::SeqCst) {
            return Err(Error::new_negotiation(
                "channel failed".to_string(),
                NegotiationErrorKind::PeerConnectionError,
            ));
        }
        let state = Arc::new(FakeChannelState {
            channel_id: channel_id.to_string(),
            ..Default::default()
        });
        self.channels
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), state.clone());
        Ok(Box::new(FakeChannel {
            local_agent_id: self.local_agent_id.clone(),
            agent_id: agent_id.to_string(),
            state,
            flags: self.flags.clone(),
        }))
    }

    async fn attach_audio(
        &self,
        agent_id: &str,
        stream: &RemoteStream,
    ) -> Result<AudioAttachment, Error> {
        if stream.id.is_empty() {
            return Err(Error::new_media(
                "empty stream".to_string(),
                MediaErrorKind::StreamNotFoundError,
            ));
        }
        let n = self.attachments_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AudioAttachment {
            id: format!("audio-{}-{}", agent_id, n),
            agent_id: agent_id.to_string(),
        })
    }

    async fn place_audio(&self, attachment: &AudioAttachment, offset: &RelativeOffset) {
        self.placements
            .lock()
            .unwrap()
            .push((attachment.clone(), *offset));
    }

    async fn release_audio(&self, attachment: AudioAttachment) {
        self.released.lock().unwrap().push(attachment);
    }
}
