use std::sync::Arc;

use derivative::Derivative;
use enclose::enc;
use tokio::sync::{broadcast, mpsc, watch};
use webrtc::{rtp::packet::Packet, track::track_remote::TrackRemote};

use crate::{config::SpatialAudioConfig, spatializer::RelativeOffset};

const RTP_CAPACITY: usize = 1024;

/// A remote agent's audio track together with its current placement.
///
/// RTP packets read from the track are fanned out to every packet subscriber; the
/// audio engine pairs them with the latest placement and the panner settings.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SpatialAudio {
    pub id: String,
    pub agent_id: String,
    track_id: String,
    config: SpatialAudioConfig,
    #[derivative(Debug = "ignore")]
    rtp_sender: broadcast::Sender<Packet>,
    placement_sender: watch::Sender<RelativeOffset>,
    closed_sender: mpsc::UnboundedSender<bool>,
}

impl SpatialAudio {
    pub(crate) fn new(
        id: String,
        agent_id: String,
        track: Arc<TrackRemote>,
        config: SpatialAudioConfig,
    ) -> Arc<Self> {
        let (rtp_sender, _) = broadcast::channel(RTP_CAPACITY);
        let (closed_sender, closed_receiver) = mpsc::unbounded_channel();
        let track_id = track.id();

        tokio::spawn(enc!((rtp_sender, id) async move {
            Self::rtp_event_loop(id, track, rtp_sender, closed_receiver).await;
        }));

        Arc::new(Self::from_parts(
            id,
            agent_id,
            track_id,
            config,
            rtp_sender,
            closed_sender,
        ))
    }

    fn from_parts(
        id: String,
        agent_id: String,
        track_id: String,
        config: SpatialAudioConfig,
        rtp_sender: broadcast::Sender<Packet>,
        closed_sender: mpsc::UnboundedSender<bool>,
    ) -> Self {
        let (placement_sender, _) = watch::channel(RelativeOffset::default());
        tracing::debug!("SpatialAudio {} is created for {}", id, agent_id);

        Self {
            id,
            agent_id,
            track_id,
            config,
            rtp_sender,
            placement_sender,
            closed_sender,
        }
    }

    async fn rtp_event_loop(
        id: String,
        track: Arc<TrackRemote>,
        rtp_sender: broadcast::Sender<Packet>,
        mut closed_receiver: mpsc::UnboundedReceiver<bool>,
    ) {
        tracing::debug!(
            "SpatialAudio {} RTP event loop has started, {}: {}",
            id,
            track.payload_type(),
            track.codec().capability.mime_type
        );

        loop {
            tokio::select! {
                _closed = closed_receiver.recv() => {
                    break;
                }
                res = track.read_rtp() => {
                    match res {
                        Ok((rtp, _attr)) => {
                            tracing::trace!(
                                "SpatialAudio {} received RTP ssrc={} seq={}",
                                id,
                                rtp.header.ssrc,
                                rtp.header.sequence_number
                            );
                            if rtp_sender.receiver_count() > 0 {
                                if let Err(err) = rtp_sender.send(rtp) {
                                    tracing::error!("failed to broadcast rtp: {}", err);
                                }
                            }
                        }
                        Err(err) => {
                            tracing::debug!("SpatialAudio {} stopped reading rtp: {}", id, err);
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!("SpatialAudio {} RTP event loop has finished", id);
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn config(&self) -> &SpatialAudioConfig {
        &self.config
    }

    pub fn subscribe_packets(&self) -> broadcast::Receiver<Packet> {
        self.rtp_sender.subscribe()
    }

    pub fn subscribe_placement(&self) -> watch::Receiver<RelativeOffset> {
        self.placement_sender.subscribe()
    }

    pub fn placement(&self) -> RelativeOffset {
        *self.placement_sender.borrow()
    }

    pub(crate) fn place(&self, offset: RelativeOffset) {
        self.placement_sender.send_replace(offset);
    }

    pub fn close(&self) {
        let _ = self.closed_sender.send(true);
    }
}

impl Drop for SpatialAudio {
    fn drop(&mut self) {
        tracing::debug!("SpatialAudio {} is dropped", self.id);
    }
}
