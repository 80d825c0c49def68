use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worldmesh::{
    config::WorldConfig, error::Error, local_hub::LocalHub, mesh::MeshEvent,
    presence::Vector3, rtc_channel::RtcMediaProvider, world::WorldConnection,
};

const AGENTS: [&str; 3] = ["alice", "bob", "carol"];

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let hub = LocalHub::new();
    let mut worlds = Vec::new();

    for agent_id in AGENTS {
        let mut config = WorldConfig::new(agent_id);
        // Host candidates are enough on loopback.
        config.transport.configuration.ice_servers = vec![];
        let media = Arc::new(RtcMediaProvider::from_config(&config));
        let endpoint = hub.endpoint(agent_id);
        let world = WorldConnection::connect(config, endpoint.clone(), endpoint, media).await?;

        let mut events = world.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    MeshEvent::ConnectivityChanged {
                        agent_id: peer,
                        connected,
                    } => tracing::info!("{}: {} connected={}", agent_id, peer, connected),
                    MeshEvent::DataReceived {
                        agent_id: peer,
                        data,
                    } => tracing::info!(
                        "{}: data from {}: {}",
                        agent_id,
                        peer,
                        String::from_utf8_lossy(&data)
                    ),
                    _ => {}
                }
            }
        });

        hub.join(world.clone()).await;
        worlds.push(world);
    }

    tokio::time::sleep(Duration::from_secs(3)).await;

    for (i, world) in worlds.iter().enumerate() {
        let x = i as f64 * 2.0;
        world
            .update_local_presence(Some(Vector3::new(x, 0.0, 0.0)), None)
            .await?;
    }

    for world in worlds.iter() {
        for peer in AGENTS.iter().filter(|peer| **peer != world.local_agent_id()) {
            let message = format!("hello from {}", world.local_agent_id());
            if let Err(err) = world.send_data(peer, Bytes::from(message)).await {
                tracing::warn!("{} -> {}: {}", world.local_agent_id(), peer, err);
            }
        }
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    for world in worlds.iter() {
        let status = world.status().await?;
        tracing::info!(
            "{} status: {}",
            world.local_agent_id(),
            serde_json::to_string(&status)?
        );
    }

    for agent_id in AGENTS {
        if let Some(world) = hub.leave(agent_id).await {
            world.disconnect().await?;
        }
    }

    Ok(())
}
