use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use bytes::Bytes;
use derivative::Derivative;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    channel::{ChannelEvent, ChannelEventSender, MediaProvider},
    config::WorldConfig,
    error::{Error, WorldErrorKind},
    membership::{MembershipEvent, MembershipView},
    negotiation::NegotiationState,
    peer_link::{LinkResources, PeerLink},
    presence::{PresenceRecord, Vector3},
    signal::{PresenceTransport, Signal, SignalingRelay},
    spatializer,
};

const MESH_EVENT_CAPACITY: usize = 1024;

/// Notifications fanned out to every subscriber of a mesh.
#[derive(Clone, Debug)]
pub enum MeshEvent {
    LinkStateChanged {
        agent_id: String,
        from: NegotiationState,
        to: NegotiationState,
    },
    MembershipChanged {
        joined: Vec<String>,
        left: Vec<String>,
    },
    ConnectivityChanged {
        agent_id: String,
        connected: bool,
    },
    DataReceived {
        agent_id: String,
        data: Bytes,
    },
}

/// Agents added to and removed from the mesh table by one reconcile, in sorted order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDiff {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub agent_id: String,
    pub state: NegotiationState,
    pub connected: bool,
    pub has_audio: bool,
    pub presence: Option<PresenceRecord>,
}

/// Owns the table of [`PeerLink`]s and keeps it consistent with membership.
///
/// Every method takes `&mut self`; callers serialize access, usually through
/// [`crate::world::WorldConnection`]'s event loop.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct MeshManager {
    local_presence: PresenceRecord,
    realtime_links_enabled: bool,
    links: HashMap<String, PeerLink>,
    remote_presences: HashMap<String, PresenceRecord>,
    membership: MembershipView,
    resources: LinkResources,
    #[derivative(Debug = "ignore")]
    presence_transport: Arc<dyn PresenceTransport>,
    shut_down: bool,
}

impl MeshManager {
    pub fn new(
        config: &WorldConfig,
        relay: Arc<dyn SignalingRelay>,
        presence_transport: Arc<dyn PresenceTransport>,
        media: Arc<dyn MediaProvider>,
        channel_event_sender: ChannelEventSender,
    ) -> Result<Self, Error> {
        let local_presence = PresenceRecord::new(config.local_agent_id.clone())?;
        let (mesh_event_sender, _) = broadcast::channel(MESH_EVENT_CAPACITY);

        tracing::debug!("MeshManager for {} is created", local_presence.agent_id);

        Ok(Self {
            local_presence,
            realtime_links_enabled: config.realtime_links_enabled,
            links: HashMap::new(),
            remote_presences: HashMap::new(),
            membership: MembershipView::new(),
            resources: LinkResources {
                relay,
                media,
                channel_event_sender,
                mesh_event_sender,
            },
            presence_transport,
            shut_down: false,
        })
    }

    pub fn local_agent_id(&self) -> &str {
        &self.local_presence.agent_id
    }

    pub fn local_presence(&self) -> &PresenceRecord {
        &self.local_presence
    }

    pub fn membership(&self) -> &MembershipView {
        &self.membership
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.resources.mesh_event_sender.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<MeshEvent> {
        self.resources.mesh_event_sender.clone()
    }

    pub fn link(&self, agent_id: &str) -> Option<&PeerLink> {
        self.links.get(agent_id)
    }

    pub fn link_state(&self, agent_id: &str) -> Option<NegotiationState> {
        self.links.get(agent_id).map(|link| link.state())
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn peer_status(&self) -> Vec<PeerStatus> {
        let mut status: Vec<PeerStatus> = self
            .links
            .values()
            .map(|link| PeerStatus {
                agent_id: link.agent_id.clone(),
                state: link.state(),
                connected: link.is_connected(),
                has_audio: link.audio_attachment().is_some(),
                presence: link.remote_presence().cloned(),
            })
            .collect();
        status.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        status
    }

    pub fn connected_peer_count(&self) -> usize {
        self.links.values().filter(|link| link.is_connected()).count()
    }

    /// Brings the table in line with `members`. The local agent id is ignored.
    pub async fn reconcile(&mut self, members: &HashSet<String>) -> MembershipDiff {
        if self.shut_down {
            tracing::warn!("reconcile after shutdown is ignored");
            return MembershipDiff::default();
        }

        let mut members = members.clone();
        members.remove(&self.local_presence.agent_id);
        self.remote_presences
            .retain(|agent_id, _| members.contains(agent_id));

        let mut left: Vec<String> = self
            .links
            .keys()
            .filter(|agent_id| !members.contains(*agent_id))
            .cloned()
            .collect();
        left.sort();
        let mut joined: Vec<String> = members
            .iter()
            .filter(|agent_id| !self.links.contains_key(*agent_id))
            .cloned()
            .collect();
        joined.sort();

        for agent_id in left.iter() {
            if let Some(mut link) = self.links.remove(agent_id) {
                tracing::info!("agent {} left, terminating link", agent_id);
                link.terminate().await;
            }
        }

        for agent_id in joined.iter() {
            debug_assert!(!self.links.contains_key(agent_id));
            tracing::info!("agent {} joined, creating link", agent_id);
            let link = PeerLink::new(
                agent_id.clone(),
                self.local_presence.clone(),
                self.remote_presences.get(agent_id).cloned(),
                self.resources.clone(),
            );
            self.links.insert(agent_id.clone(), link);
            if self.realtime_links_enabled {
                if let Some(link) = self.links.get_mut(agent_id) {
                    link.initiate_offer().await;
                }
            }
        }

        self.membership.replace(members);

        let diff = MembershipDiff { joined, left };
        if !diff.is_empty() {
            let _ = self
                .resources
                .mesh_event_sender
                .send(MeshEvent::MembershipChanged {
                    joined: diff.joined.clone(),
                    left: diff.left.clone(),
                });
        }
        diff
    }

    pub async fn handle_membership(&mut self, event: MembershipEvent) -> MembershipDiff {
        if let MembershipEvent::Joined {
            presence: Some(presence),
            ..
        } = &event
        {
            self.cache_remote_presence(presence.clone());
        }
        let members = self.membership.next(&event);
        self.reconcile(&members).await
    }

    /// Routes an inbound signal. Signals from agents without a link are dropped.
    pub async fn dispatch_signal(&mut self, from_agent_id: &str, signal: Signal) {
        let Some(link) = self.links.get_mut(from_agent_id) else {
            tracing::debug!(
                "dropping stale {} signal from {}: no link",
                signal.kind(),
                from_agent_id
            );
            return;
        };

        match signal {
            Signal::Offer(offer) => link.handle_offer(offer).await,
            Signal::Answer(answer) => link.handle_answer(answer).await,
            Signal::IceCandidate(candidate) => link.handle_ice_candidate(candidate).await,
        }
    }

    pub async fn update_local_presence(
        &mut self,
        position: Option<Vector3>,
        orientation: Option<Vector3>,
    ) {
        self.local_presence = self.local_presence.updated(position, orientation);
        for link in self.links.values_mut() {
            link.set_local_presence(self.local_presence.clone());
        }

        self.publish_presence().await;
        self.recompute_audio().await;
    }

    /// Publishes the local presence record. Failures are logged only.
    pub async fn publish_presence(&self) {
        if self.shut_down {
            return;
        }
        if let Err(err) = self.presence_transport.publish(&self.local_presence).await {
            tracing::warn!(
                "failed to publish presence for {}: {}",
                self.local_presence.agent_id,
                err
            );
        }
    }

    /// Stores a remote record if it is newer than the one held, and re-places its audio.
    ///
    /// Records of agents outside the membership are held until the next reconcile.
    pub async fn update_remote_presence(&mut self, record: PresenceRecord) {
        if self.shut_down || record.agent_id == self.local_presence.agent_id {
            return;
        }
        if !self.cache_remote_presence(record.clone()) {
            tracing::trace!("ignoring older presence for {}", record.agent_id);
            return;
        }
        if let Some(link) = self.links.get_mut(&record.agent_id) {
            link.set_remote_presence(record);
            spatializer::place(
                self.resources.media.as_ref(),
                &self.local_presence,
                link.remote_presence(),
                link.audio_attachment(),
            )
            .await;
        }
    }

    pub async fn recompute_audio(&self) -> usize {
        spatializer::recompute_all(
            self.resources.media.as_ref(),
            &self.local_presence,
            self.links.values(),
        )
        .await
    }

    /// Applies an event raised by a link's channel.
    ///
    /// Events from a channel that no longer belongs to the current link for the
    /// agent are dropped.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        let Some(link) = self.links.get_mut(event.agent_id()) else {
            tracing::debug!(
                "dropping channel event for removed link {}",
                event.agent_id()
            );
            return;
        };
        if link.id != event.channel_id() {
            tracing::debug!(
                "dropping channel event from stale channel {} of {}",
                event.channel_id(),
                event.agent_id()
            );
            return;
        }

        match event {
            ChannelEvent::LocalCandidate {
                agent_id,
                candidate,
                ..
            } => {
                if link.state().is_closed() {
                    return;
                }
                if let Err(err) = self
                    .resources
                    .relay
                    .send(&agent_id, Signal::IceCandidate(candidate))
                    .await
                {
                    tracing::warn!("failed to send ice candidate to {}: {}", agent_id, err);
                }
            }
            ChannelEvent::RemoteAudio { agent_id, stream } => {
                if let Err(err) = link.attach_audio(&stream).await {
                    tracing::warn!("failed to attach audio for {}: {}", agent_id, err);
                    return;
                }
                spatializer::place(
                    self.resources.media.as_ref(),
                    &self.local_presence,
                    link.remote_presence(),
                    link.audio_attachment(),
                )
                .await;
            }
            ChannelEvent::Connectivity { connected, .. } => {
                link.set_connected(connected);
            }
            ChannelEvent::Data { agent_id, data, .. } => {
                let _ = self
                    .resources
                    .mesh_event_sender
                    .send(MeshEvent::DataReceived { agent_id, data });
            }
        }
    }

    pub async fn renegotiate(&mut self, agent_id: &str) -> Result<(), Error> {
        let link = self.links.get_mut(agent_id).ok_or_else(|| peer_not_found(agent_id))?;
        link.initiate_offer().await;
        Ok(())
    }

    pub async fn send_data(&mut self, agent_id: &str, data: Bytes) -> Result<(), Error> {
        let link = self.links.get(agent_id).ok_or_else(|| peer_not_found(agent_id))?;
        link.send_data(data).await
    }

    /// Terminates every link and closes both transports. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        tracing::info!("MeshManager for {} is shutting down", self.local_presence.agent_id);

        let mut agent_ids: Vec<String> = self.links.keys().cloned().collect();
        agent_ids.sort();
        for agent_id in agent_ids {
            if let Some(mut link) = self.links.remove(&agent_id) {
                link.terminate().await;
            }
        }
        self.remote_presences.clear();
        self.membership.replace(HashSet::new());

        if let Err(err) = self.resources.relay.close().await {
            tracing::warn!("failed to close signaling relay: {}", err);
        }
        if let Err(err) = self.presence_transport.close().await {
            tracing::warn!("failed to close presence transport: {}", err);
        }
    }

    fn cache_remote_presence(&mut self, record: PresenceRecord) -> bool {
        match self.remote_presences.get(&record.agent_id) {
            Some(current) if !record.is_newer_than(current) => false,
            _ => {
                self.remote_presences.insert(record.agent_id.clone(), record);
                true
            }
        }
    }
}

fn peer_not_found(agent_id: &str) -> Error {
    Error::new_world(
        format!("peer {} is not in the mesh", agent_id),
        WorldErrorKind::PeerNotFoundError,
    )
}

impl Drop for MeshManager {
    fn drop(&mut self) {
        tracing::debug!("MeshManager for {} is dropped", self.local_presence.agent_id);
    }
}
