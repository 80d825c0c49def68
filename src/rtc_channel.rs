use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use derivative::Derivative;
use enclose::enc;
use interceptor::registry::Registry;
use tokio::sync::Mutex;
use uuid::Uuid;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        APIBuilder,
    },
    data_channel::{
        data_channel_init::RTCDataChannelInit, data_channel_message::DataChannelMessage,
        data_channel_state::RTCDataChannelState, RTCDataChannel,
    },
    ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
    peer_connection::{
        peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_receiver::RTCRtpReceiver,
        rtp_transceiver_direction::RTCRtpTransceiverDirection, RTCRtpTransceiver,
        RTCRtpTransceiverInit,
    },
    track::{track_local::TrackLocal, track_remote::TrackRemote},
};

use crate::{
    channel::{
        AudioAttachment, ChannelEvent, ChannelEventSender, MediaProvider, PeerChannel,
        RemoteStream,
    },
    config::{SpatialAudioConfig, WebRTCTransportConfig, WorldConfig},
    error::{Error, MediaErrorKind, NegotiationErrorKind},
    media_engine,
    spatial_audio::SpatialAudio,
    spatializer::RelativeOffset,
};

// Both ends create the data channel with the same id, so it survives offer collisions.
const DATA_CHANNEL_ID: u16 = 0;

// Remote tracks waiting to be attached, per channel id.
type RemoteTracks = Arc<Mutex<HashMap<String, HashMap<String, Arc<TrackRemote>>>>>;

/// [`MediaProvider`] backed by `webrtc` peer connections.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RtcMediaProvider {
    transport_config: WebRTCTransportConfig,
    data_channel_label: String,
    spatial_audio_config: SpatialAudioConfig,
    #[derivative(Debug = "ignore")]
    local_audio: Option<Arc<dyn TrackLocal + Send + Sync>>,
    #[derivative(Debug = "ignore")]
    remote_tracks: RemoteTracks,
    attachments: Arc<Mutex<HashMap<String, Arc<SpatialAudio>>>>,
}

impl RtcMediaProvider {
    pub fn new(
        transport_config: WebRTCTransportConfig,
        data_channel_label: String,
        spatial_audio_config: SpatialAudioConfig,
    ) -> Self {
        Self {
            transport_config,
            data_channel_label,
            spatial_audio_config,
            local_audio: None,
            remote_tracks: Arc::new(Mutex::new(HashMap::new())),
            attachments: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &WorldConfig) -> Self {
        Self::new(
            config.transport.clone(),
            config.data_channel_label.clone(),
            config.spatial_audio.clone(),
        )
    }

    /// Sends `track` to every peer instead of opening receive-only audio.
    pub fn with_local_audio(mut self, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        self.local_audio = Some(track);
        self
    }

    pub async fn spatial_audio(&self, attachment_id: &str) -> Option<Arc<SpatialAudio>> {
        self.attachments.lock().await.get(attachment_id).cloned()
    }
}

#[async_trait]
impl MediaProvider for RtcMediaProvider {
    async fn create_channel(
        &self,
        agent_id: &str,
        channel_id: &str,
        events: ChannelEventSender,
    ) -> Result<Box<dyn PeerChannel>, Error> {
        let channel = RtcChannel::new(
            channel_id.to_string(),
            agent_id.to_string(),
            &self.transport_config,
            &self.data_channel_label,
            self.local_audio.clone(),
            self.remote_tracks.clone(),
            events,
        )
        .await?;
        Ok(Box::new(channel))
    }

    async fn attach_audio(
        &self,
        agent_id: &str,
        stream: &RemoteStream,
    ) -> Result<AudioAttachment, Error> {
        let track = self
            .remote_tracks
            .lock()
            .await
            .get_mut(&stream.channel_id)
            .and_then(|tracks| tracks.remove(&stream.id))
            .ok_or(Error::new_media(
                format!("remote stream {} does not exist", stream.id),
                MediaErrorKind::StreamNotFoundError,
            ))?;

        let id = Uuid::new_v4().to_string();
        let audio = SpatialAudio::new(
            id.clone(),
            agent_id.to_string(),
            track,
            self.spatial_audio_config.clone(),
        );
        self.attachments.lock().await.insert(id.clone(), audio);

        Ok(AudioAttachment {
            id,
            agent_id: agent_id.to_string(),
        })
    }

    async fn place_audio(&self, attachment: &AudioAttachment, offset: &RelativeOffset) {
        match self.attachments.lock().await.get(&attachment.id) {
            Some(audio) => audio.place(*offset),
            None => tracing::warn!("audio {} is not attached", attachment.id),
        }
    }

    async fn release_audio(&self, attachment: AudioAttachment) {
        if let Some(audio) = self.attachments.lock().await.remove(&attachment.id) {
            audio.close();
        }
    }
}

/// One `RTCPeerConnection` to a remote agent: an audio transceiver and a data channel.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RtcChannel {
    pub id: String,
    pub agent_id: String,
    #[derivative(Debug = "ignore")]
    peer_connection: Arc<RTCPeerConnection>,
    #[derivative(Debug = "ignore")]
    data_channel: Arc<RTCDataChannel>,
    #[derivative(Debug = "ignore")]
    remote_tracks: RemoteTracks,
}

impl RtcChannel {
    pub(crate) async fn new(
        id: String,
        agent_id: String,
        transport_config: &WebRTCTransportConfig,
        data_channel_label: &str,
        local_audio: Option<Arc<dyn TrackLocal + Send + Sync>>,
        remote_tracks: RemoteTracks,
        events: ChannelEventSender,
    ) -> Result<Self, Error> {
        let peer_connection = Arc::new(Self::generate_peer_connection(transport_config).await?);

        match local_audio {
            Some(track) => {
                let rtp_sender = peer_connection.add_track(track).await?;
                tokio::spawn(async move {
                    let mut rtcp_buf = vec![0u8; 1500];
                    while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
                });
            }
            None => {
                peer_connection
                    .add_transceiver_from_kind(
                        RTPCodecType::Audio,
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await?;
            }
        }

        let data_channel = peer_connection
            .create_data_channel(
                data_channel_label,
                Some(RTCDataChannelInit {
                    negotiated: Some(DATA_CHANNEL_ID),
                    ..Default::default()
                }),
            )
            .await?;

        remote_tracks.lock().await.insert(id.clone(), HashMap::new());
        let channel = Self {
            id,
            agent_id,
            peer_connection,
            data_channel,
            remote_tracks,
        };
        channel.hooks(events);

        tracing::debug!("RtcChannel {} is created for {}", channel.id, channel.agent_id);

        Ok(channel)
    }

    async fn generate_peer_connection(
        transport_config: &WebRTCTransportConfig,
    ) -> Result<RTCPeerConnection, Error> {
        let mut me = MediaEngine::default();
        media_engine::register_default_codecs(&mut me)?;
        media_engine::register_extensions(&mut me)?;
        let registry = register_default_interceptors(Registry::new(), &mut me)?;

        let api = APIBuilder::new()
            .with_media_engine(me)
            .with_interceptor_registry(registry)
            .with_setting_engine(transport_config.setting_engine())
            .build();

        let peer_connection = api
            .new_peer_connection(transport_config.configuration())
            .await?;
        Ok(peer_connection)
    }

    fn hooks(&self, events: ChannelEventSender) {
        let agent_id = self.agent_id.clone();
        let channel_id = self.id.clone();
        let remote_tracks = self.remote_tracks.clone();

        self.peer_connection.on_ice_candidate(Box::new(enc!((agent_id, channel_id, events)
            move |candidate: Option<RTCIceCandidate>| {
                Box::pin(enc!((agent_id, channel_id, events) async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    tracing::debug!("on ice candidate for {}: {}", agent_id, candidate);
                    match candidate.to_json() {
                        Ok(candidate) => {
                            let _ = events.send(ChannelEvent::LocalCandidate {
                                agent_id,
                                channel_id,
                                candidate,
                            });
                        }
                        Err(err) => tracing::error!("failed to serialize ice candidate: {}", err),
                    }
                }))
            }
        )));

        self.peer_connection.on_track(Box::new(enc!((agent_id, channel_id, events, remote_tracks)
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                Box::pin(enc!((agent_id, channel_id, events, remote_tracks) async move {
                    if track.kind() != RTPCodecType::Audio {
                        tracing::debug!("ignoring {} track from {}", track.kind(), agent_id);
                        return;
                    }
                    let id = track.id();
                    tracing::info!("remote audio {} arrived from {}", id, agent_id);
                    match remote_tracks.lock().await.get_mut(&channel_id) {
                        Some(tracks) => {
                            tracks.insert(id.clone(), track);
                        }
                        None => {
                            tracing::debug!("channel {} is closed, dropping track {}", channel_id, id);
                            return;
                        }
                    }
                    let _ = events.send(ChannelEvent::RemoteAudio {
                        agent_id,
                        stream: RemoteStream { id, channel_id },
                    });
                }))
            }
        )));

        self.peer_connection.on_peer_connection_state_change(Box::new(enc!((agent_id, channel_id, events)
            move |state: RTCPeerConnectionState| {
                Box::pin(enc!((agent_id, channel_id, events) async move {
                    tracing::debug!("peer connection state for {}: {}", agent_id, state);
                    let connected = match state {
                        RTCPeerConnectionState::Connected => true,
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed => false,
                        _ => return,
                    };
                    let _ = events.send(ChannelEvent::Connectivity {
                        agent_id,
                        channel_id,
                        connected,
                    });
                }))
            }
        )));

        self.data_channel.on_message(Box::new(enc!((agent_id, channel_id, events)
            move |msg: DataChannelMessage| {
                Box::pin(enc!((agent_id, channel_id, events) async move {
                    let _ = events.send(ChannelEvent::Data {
                        agent_id,
                        channel_id,
                        data: msg.data,
                    });
                }))
            }
        )));

        self.peer_connection.on_data_channel(Box::new(enc!((agent_id)
            move |dc: Arc<RTCDataChannel>| {
                Box::pin(enc!((agent_id) async move {
                    tracing::warn!(
                        "ignoring unexpected data channel {} from {}",
                        dc.label(),
                        agent_id
                    );
                }))
            }
        )));
    }

    async fn local_description(&self) -> Result<RTCSessionDescription, Error> {
        match self.peer_connection.local_description().await {
            Some(description) => Ok(description),
            None => Err(Error::new_negotiation(
                "Failed to set local description".to_string(),
                NegotiationErrorKind::LocalDescriptionError,
            )),
        }
    }
}

#[async_trait]
impl PeerChannel for RtcChannel {
    async fn create_offer(&self) -> Result<RTCSessionDescription, Error> {
        tracing::debug!("RtcChannel {} creates offer", self.id);
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection.set_local_description(offer).await?;
        self.local_description().await
    }

    async fn create_answer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, Error> {
        tracing::debug!("RtcChannel {} set remote offer", self.id);
        self.peer_connection.set_remote_description(offer).await?;
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection.set_local_description(answer).await?;
        self.local_description().await
    }

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), Error> {
        tracing::debug!("RtcChannel {} set remote answer", self.id);
        self.peer_connection.set_remote_description(answer).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Error> {
        let mut rollback = self.local_description().await?;
        rollback.sdp_type = RTCSdpType::Rollback;
        self.peer_connection.set_local_description(rollback).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error> {
        self.peer_connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn send_data(&self, data: Bytes) -> Result<(), Error> {
        if self.data_channel.ready_state() != RTCDataChannelState::Open {
            return Err(Error::new_media(
                format!("data channel to {} is not open", self.agent_id),
                MediaErrorKind::DataChannelNotOpenError,
            ));
        }
        self.data_channel.send(&data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(tracks) = self.remote_tracks.lock().await.remove(&self.id) {
            if !tracks.is_empty() {
                tracing::debug!(
                    "RtcChannel {} drops {} unattached tracks",
                    self.id,
                    tracks.len()
                );
            }
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

impl Drop for RtcChannel {
    fn drop(&mut self) {
        tracing::debug!("RtcChannel {} is dropped", self.id);
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;
    use webrtc::peer_connection::signaling_state::RTCSignalingState;

    use super::*;

    fn transport_config() -> WebRTCTransportConfig {
        let mut config = WebRTCTransportConfig::default();
        config.configuration.ice_servers = vec![];
        config
    }

    async fn channel(agent_id: &str) -> RtcChannel {
        let (events, _) = mpsc::unbounded_channel();
        RtcChannel::new(
            format!("channel-{}", agent_id),
            agent_id.to_string(),
            &transport_config(),
            "data",
            None,
            Arc::new(Mutex::new(HashMap::new())),
            events,
        )
        .await
        .expect("channel")
    }

    #[tokio::test]
    async fn test_offer_carries_audio_and_data() {
        let alice = channel("bob").await;
        let offer = alice.create_offer().await.expect("offer");
        assert_eq!(offer.sdp_type, RTCSdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        alice.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let alice = channel("bob").await;
        let bob = channel("alice").await;

        let offer = alice.create_offer().await.expect("offer");
        let answer = bob.create_answer(offer).await.expect("answer");
        assert_eq!(answer.sdp_type, RTCSdpType::Answer);
        alice.apply_answer(answer).await.expect("apply");

        assert_eq!(
            alice.peer_connection.signaling_state(),
            RTCSignalingState::Stable
        );
        alice.close().await.expect("close");
        bob.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_send_data_requires_open_channel() {
        let alice = channel("bob").await;
        let err = alice.send_data(Bytes::from_static(b"hi")).await;
        assert!(matches!(err, Err(Error::MediaError(_))));
        alice.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_attach_unknown_stream_fails() {
        let provider = RtcMediaProvider::new(
            transport_config(),
            "data".to_string(),
            SpatialAudioConfig::default(),
        );
        let res = provider
            .attach_audio(
                "bob",
                &RemoteStream {
                    id: "missing".to_string(),
                    channel_id: "channel".to_string(),
                },
            )
            .await;
        assert!(matches!(res, Err(Error::MediaError(_))));
    }

    #[tokio::test]
    async fn test_close_forgets_channel_tracks() {
        let provider = RtcMediaProvider::new(
            transport_config(),
            "data".to_string(),
            SpatialAudioConfig::default(),
        );
        let (events, _) = mpsc::unbounded_channel();
        let first = provider
            .create_channel("bob", "first", events.clone())
            .await
            .expect("channel");
        let second = provider
            .create_channel("carol", "second", events)
            .await
            .expect("channel");
        assert_eq!(provider.remote_tracks.lock().await.len(), 2);

        first.close().await.expect("close");
        let tracks = provider.remote_tracks.lock().await;
        assert!(!tracks.contains_key("first"));
        assert!(tracks.contains_key("second"));
        drop(tracks);

        let res = provider
            .attach_audio(
                "bob",
                &RemoteStream {
                    id: "audio".to_string(),
                    channel_id: "first".to_string(),
                },
            )
            .await;
        assert!(matches!(res, Err(Error::MediaError(_))));
        second.close().await.expect("close");
        assert!(provider.remote_tracks.lock().await.is_empty());
    }
}
