use std::{collections::HashSet, sync::Arc, time::Duration};

use bytes::Bytes;
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{self, Instant},
};
use uuid::Uuid;

use crate::{
    channel::{ChannelEventReceiver, MediaProvider},
    config::WorldConfig,
    error::{Error, WorldErrorKind},
    membership::MembershipEvent,
    mesh::{MembershipDiff, MeshEvent, MeshManager, PeerStatus},
    presence::{PresenceRecord, Vector3},
    signal::{PresenceTransport, Signal, SignalingRelay},
};

/// Snapshot of a world connection returned by [`WorldConnection::status`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldStatus {
    pub local: PresenceRecord,
    pub peers: Vec<PeerStatus>,
    pub connected_peer_count: usize,
}

/// Handle to the local agent's presence in one world.
///
/// The mesh is owned by a single event loop; every call on this handle is posted to
/// its mailbox and processed in order, one event fully settled before the next.
/// Clones share the same loop.
#[derive(Clone, Debug)]
pub struct WorldConnection {
    pub id: String,
    local_agent_id: String,
    world_event_sender: mpsc::UnboundedSender<WorldEvent>,
    mesh_event_sender: broadcast::Sender<MeshEvent>,
}

impl WorldConnection {
    /// Creates the mesh, publishes the initial presence and starts the event loop.
    pub async fn connect(
        config: WorldConfig,
        relay: Arc<dyn SignalingRelay>,
        presence_transport: Arc<dyn PresenceTransport>,
        media: Arc<dyn MediaProvider>,
    ) -> Result<Self, Error> {
        let id = Uuid::new_v4().to_string();
        let (channel_event_sender, channel_event_receiver) = mpsc::unbounded_channel();
        let mesh = MeshManager::new(
            &config,
            relay,
            presence_transport,
            media,
            channel_event_sender,
        )?;
        mesh.publish_presence().await;

        let (tx, rx) = mpsc::unbounded_channel::<WorldEvent>();
        let mesh_event_sender = mesh.event_sender();

        tokio::spawn({
            let id = id.clone();
            async move {
                WorldConnection::world_event_loop(id, mesh, rx, channel_event_receiver).await;
            }
        });

        if let Some(period) = config.presence_publish_interval {
            tokio::spawn(WorldConnection::presence_ticker(tx.downgrade(), period));
        }

        tracing::info!(
            "WorldConnection {} is connected as {}",
            id,
            config.local_agent_id
        );

        Ok(Self {
            id,
            local_agent_id: config.local_agent_id,
            world_event_sender: tx,
            mesh_event_sender,
        })
    }

    pub fn local_agent_id(&self) -> &str {
        &self.local_agent_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.mesh_event_sender.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        !self.world_event_sender.is_closed()
    }

    pub async fn reconcile(&self, members: HashSet<String>) -> Result<MembershipDiff, Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.post(WorldEvent::Reconcile(members, reply_sender))?;
        reply_receiver.await.map_err(|_| disconnected())
    }

    pub async fn handle_membership(&self, event: MembershipEvent) -> Result<MembershipDiff, Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.post(WorldEvent::Membership(event, reply_sender))?;
        reply_receiver.await.map_err(|_| disconnected())
    }

    /// Queues an inbound signal. Returns once queued, not once handled.
    pub fn dispatch_signal(&self, from_agent_id: &str, signal: Signal) -> Result<(), Error> {
        self.post(WorldEvent::Signal(from_agent_id.to_string(), signal))
    }

    /// Queues a presence record received from another agent.
    pub fn update_remote_presence(&self, record: PresenceRecord) -> Result<(), Error> {
        self.post(WorldEvent::RemotePresence(record))
    }

    pub async fn update_local_presence(
        &self,
        position: Option<Vector3>,
        orientation: Option<Vector3>,
    ) -> Result<(), Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.post(WorldEvent::LocalPresence(
            position,
            orientation,
            reply_sender,
        ))?;
        reply_receiver.await.map_err(|_| disconnected())
    }

    pub async fn renegotiate(&self, agent_id: &str) -> Result<(), Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.post(WorldEvent::Renegotiate(agent_id.to_string(), reply_sender))?;
        reply_receiver.await.map_err(|_| disconnected())?
    }

    pub async fn send_data(&self, agent_id: &str, data: Bytes) -> Result<(), Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.post(WorldEvent::SendData(
            agent_id.to_string(),
            data,
            reply_sender,
        ))?;
        reply_receiver.await.map_err(|_| disconnected())?
    }

    pub async fn status(&self) -> Result<WorldStatus, Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.post(WorldEvent::Status(reply_sender))?;
        reply_receiver.await.map_err(|_| disconnected())
    }

    /// Shuts the mesh down and stops the event loop. Idempotent.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        if self
            .world_event_sender
            .send(WorldEvent::Disconnect(reply_sender))
            .is_err()
        {
            return Ok(());
        }
        let _ = reply_receiver.await;
        Ok(())
    }

    fn post(&self, event: WorldEvent) -> Result<(), Error> {
        self.world_event_sender
            .send(event)
            .map_err(|_| disconnected())
    }

    async fn world_event_loop(
        id: String,
        mut mesh: MeshManager,
        mut event_receiver: mpsc::UnboundedReceiver<WorldEvent>,
        mut channel_event_receiver: ChannelEventReceiver,
    ) {
        tracing::debug!("WorldConnection {} event loop has started", id);

        loop {
            tokio::select! {
                event = event_receiver.recv() => {
                    let Some(event) = event else {
                        mesh.shutdown().await;
                        break;
                    };
                    match event {
                        WorldEvent::Reconcile(members, reply_sender) => {
                            let diff = mesh.reconcile(&members).await;
                            let _ = reply_sender.send(diff);
                        }
                        WorldEvent::Membership(event, reply_sender) => {
                            let diff = mesh.handle_membership(event).await;
                            let _ = reply_sender.send(diff);
                        }
                        WorldEvent::Signal(from_agent_id, signal) => {
                            mesh.dispatch_signal(&from_agent_id, signal).await;
                        }
                        WorldEvent::RemotePresence(record) => {
                            mesh.update_remote_presence(record).await;
                        }
                        WorldEvent::LocalPresence(position, orientation, reply_sender) => {
                            mesh.update_local_presence(position, orientation).await;
                            let _ = reply_sender.send(());
                        }
                        WorldEvent::PublishPresence => {
                            mesh.publish_presence().await;
                        }
                        WorldEvent::Renegotiate(agent_id, reply_sender) => {
                            let res = mesh.renegotiate(&agent_id).await;
                            let _ = reply_sender.send(res);
                        }
                        WorldEvent::SendData(agent_id, data, reply_sender) => {
                            let res = mesh.send_data(&agent_id, data).await;
                            let _ = reply_sender.send(res);
                        }
                        WorldEvent::Status(reply_sender) => {
                            let status = WorldStatus {
                                local: mesh.local_presence().clone(),
                                peers: mesh.peer_status(),
                                connected_peer_count: mesh.connected_peer_count(),
                            };
                            let _ = reply_sender.send(status);
                        }
                        WorldEvent::Disconnect(reply_sender) => {
                            mesh.shutdown().await;
                            let _ = reply_sender.send(());
                            break;
                        }
                    }
                }
                Some(event) = channel_event_receiver.recv() => {
                    mesh.handle_channel_event(event).await;
                }
            }
        }

        tracing::info!("WorldConnection {} event loop finished", id);
    }

    async fn presence_ticker(
        world_event_sender: mpsc::WeakUnboundedSender<WorldEvent>,
        period: Duration,
    ) {
        let mut interval = time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            let Some(sender) = world_event_sender.upgrade() else {
                break;
            };
            if sender.send(WorldEvent::PublishPresence).is_err() {
                break;
            }
        }
        tracing::trace!("presence ticker finished");
    }
}

fn disconnected() -> Error {
    Error::new_world(
        "world connection is closed".to_string(),
        WorldErrorKind::DisconnectedError,
    )
}

#[derive(Debug)]
enum WorldEvent {
    Reconcile(HashSet<String>, oneshot::Sender<MembershipDiff>),
    Membership(MembershipEvent, oneshot::Sender<MembershipDiff>),
    Signal(String, Signal),
    RemotePresence(PresenceRecord),
    LocalPresence(Option<Vector3>, Option<Vector3>, oneshot::Sender<()>),
    PublishPresence,
    Renegotiate(String, oneshot::Sender<Result<(), Error>>),
    SendData(String, Bytes, oneshot::Sender<Result<(), Error>>),
    Status(oneshot::Sender<WorldStatus>),
    Disconnect(oneshot::Sender<()>),
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        error::WorldErrorKind,
        negotiation::NegotiationState,
        signal::SignalKind,
        test_support::{FakeMedia, RecordingPresence, RecordingRelay},
    };

    struct Fixture {
        world: WorldConnection,
        relay: Arc<RecordingRelay>,
        presence: Arc<RecordingPresence>,
    }

    async fn fixture(config: WorldConfig) -> Fixture {
        let relay = RecordingRelay::new();
        let presence = RecordingPresence::new();
        let media = FakeMedia::new(&config.local_agent_id);
        let world = WorldConnection::connect(config, relay.clone(), presence.clone(), media)
            .await
            .expect("connect");
        Fixture {
            world,
            relay,
            presence,
        }
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_connect_publishes_initial_presence() {
        let mut config = WorldConfig::new("alice");
        config.presence_publish_interval = None;
        let f = fixture(config).await;

        let published = f.presence.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].agent_id, "alice");
        assert!(f.world.is_connected());
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_agent_id() {
        let result = WorldConnection::connect(
            WorldConfig::new(""),
            RecordingRelay::new(),
            RecordingPresence::new(),
            FakeMedia::new(""),
        )
        .await;
        match result {
            Err(Error::WorldError(err)) => assert_eq!(err.kind, WorldErrorKind::InvalidAgentIdError),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconcile_through_mailbox() {
        let f = fixture(WorldConfig::new("alice")).await;
        let diff = f.world.reconcile(set(&["alice", "bob"])).await.expect("reconcile");
        assert_eq!(diff.joined, vec!["bob"]);

        let status = f.world.status().await.expect("status");
        assert_eq!(status.local.agent_id, "alice");
        assert_eq!(status.peers.len(), 1);
        assert_eq!(status.peers[0].state, NegotiationState::AwaitingAnswer);
        assert_eq!(status.connected_peer_count, 0);
        assert_eq!(f.relay.count("bob", SignalKind::Offer), 1);
    }

    #[tokio::test]
    async fn test_unknown_peer_operations_fail() {
        let f = fixture(WorldConfig::new("alice")).await;
        assert!(f.world.renegotiate("nobody").await.is_err());
        assert!(f.world.send_data("nobody", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let f = fixture(WorldConfig::new("alice")).await;
        f.world.reconcile(set(&["bob"])).await.expect("reconcile");

        f.world.disconnect().await.expect("disconnect");
        f.world.disconnect().await.expect("disconnect again");
        assert!(f.relay.closed.load(Ordering::SeqCst));
        assert!(f.presence.closed.load(Ordering::SeqCst));

        match f.world.status().await {
            Err(Error::WorldError(err)) => assert_eq!(err.kind, WorldErrorKind::DisconnectedError),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(f.world.dispatch_signal("bob", Signal::IceCandidate(Default::default())).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_is_republished_periodically() {
        let mut config = WorldConfig::new("alice");
        config.presence_publish_interval = Some(Duration::from_millis(250));
        let f = fixture(config).await;

        time::sleep(Duration::from_millis(800)).await;
        f.world.status().await.expect("status");
        assert!(f.presence.published().len() >= 3);
    }
}
