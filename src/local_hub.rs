use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::{Error, SignalingErrorKind},
    membership::MembershipEvent,
    presence::PresenceRecord,
    signal::{PresenceTransport, Signal, SignalingRelay},
    world::WorldConnection,
};

/// In-process signaling relay and presence channel connecting several worlds.
///
/// Signals are queued on the target world's mailbox in send order. Presence records
/// go to every other registered world.
#[derive(Clone, Debug, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Debug, Default)]
struct HubInner {
    worlds: HashMap<String, WorldConnection>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the relay and presence transport used by `agent_id`'s world.
    pub fn endpoint(&self, agent_id: &str) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            agent_id: agent_id.to_string(),
            hub: self.clone(),
        })
    }

    pub async fn members(&self) -> HashSet<String> {
        self.inner.lock().await.worlds.keys().cloned().collect()
    }

    /// Registers `world` and sends the new membership snapshot to every world.
    pub async fn join(&self, world: WorldConnection) {
        let agent_id = world.local_agent_id().to_string();
        tracing::info!("agent {} joined the local hub", agent_id);
        let worlds = {
            let mut inner = self.inner.lock().await;
            inner.worlds.insert(agent_id, world);
            inner.worlds.values().cloned().collect::<Vec<_>>()
        };
        self.broadcast_snapshot(worlds).await;
    }

    /// Removes `agent_id` and sends the new membership snapshot to the remaining worlds.
    pub async fn leave(&self, agent_id: &str) -> Option<WorldConnection> {
        let (removed, worlds) = {
            let mut inner = self.inner.lock().await;
            let removed = inner.worlds.remove(agent_id);
            (removed, inner.worlds.values().cloned().collect::<Vec<_>>())
        };
        if removed.is_some() {
            tracing::info!("agent {} left the local hub", agent_id);
            self.broadcast_snapshot(worlds).await;
        }
        removed
    }

    async fn broadcast_snapshot(&self, worlds: Vec<WorldConnection>) {
        let members: HashSet<String> = worlds
            .iter()
            .map(|world| world.local_agent_id().to_string())
            .collect();
        for world in worlds {
            let event = MembershipEvent::Snapshot {
                members: members.clone(),
            };
            if let Err(err) = world.handle_membership(event).await {
                tracing::warn!(
                    "failed to deliver membership to {}: {}",
                    world.local_agent_id(),
                    err
                );
            }
        }
    }

    async fn world(&self, agent_id: &str) -> Option<WorldConnection> {
        self.inner.lock().await.worlds.get(agent_id).cloned()
    }

    async fn others(&self, agent_id: &str) -> Vec<WorldConnection> {
        self.inner
            .lock()
            .await
            .worlds
            .iter()
            .filter(|(id, _)| id.as_str() != agent_id)
            .map(|(_, world)| world.clone())
            .collect()
    }
}

/// One agent's view of a [`LocalHub`].
#[derive(Debug)]
pub struct LocalEndpoint {
    agent_id: String,
    hub: LocalHub,
}

#[async_trait]
impl SignalingRelay for LocalEndpoint {
    async fn send(&self, target_agent_id: &str, signal: Signal) -> Result<(), Error> {
        let world = self.hub.world(target_agent_id).await.ok_or(Error::new_signaling(
            format!("agent {} is not in the hub", target_agent_id),
            SignalingErrorKind::PeerUnreachableError,
        ))?;
        tracing::trace!(
            "{} {} -> {}",
            signal.kind().event_name(),
            self.agent_id,
            target_agent_id
        );
        world.dispatch_signal(&self.agent_id, signal).map_err(|err| {
            Error::new_signaling(
                format!("agent {} is unreachable: {}", target_agent_id, err),
                SignalingErrorKind::PeerUnreachableError,
            )
        })
    }
}

#[async_trait]
impl PresenceTransport for LocalEndpoint {
    async fn publish(&self, record: &PresenceRecord) -> Result<(), Error> {
        for world in self.hub.others(&self.agent_id).await {
            if let Err(err) = world.update_remote_presence(record.clone()) {
                tracing::debug!(
                    "presence from {} not delivered to {}: {}",
                    self.agent_id,
                    world.local_agent_id(),
                    err
                );
            }
        }
        Ok(())
    }
}
