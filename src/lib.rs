#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Worldmesh
//! Worldmesh keeps a mesh of WebRTC peer connections between agents sharing a virtual world. It reconciles the world's membership against a table of peer links, drives offer/answer/ICE negotiation for each link over a signaling relay you provide, and places each remote agent's audio relative to the local listener.
//! Worldmesh doesn't provide a signaling server or a membership service. Implement [`signal::SignalingRelay`] and [`signal::PresenceTransport`] for your transport, or use [`local_hub::LocalHub`] to connect worlds inside one process.
//!
//! ## Usage
//! Create a [`world::WorldConnection`] with [`world::WorldConnection::connect`], feed membership events into it, and forward inbound signals with [`world::WorldConnection::dispatch_signal`]. `demos/loopback.rs` runs three agents over a [`local_hub::LocalHub`].

/// Collaborator traits for the real-time channel and the audio engine.
pub mod channel;
/// Configuration for [`world::WorldConnection`] and [`rtc_channel::RtcMediaProvider`].
pub mod config;
pub mod error;
/// In-process relay connecting several worlds.
pub mod local_hub;
pub mod media_engine;
pub mod membership;
/// The table of peer links and its reconciliation against membership.
pub mod mesh;
pub mod negotiation;
/// Per-agent negotiation state machine.
pub mod peer_link;
pub mod presence;
/// [`webrtc::peer_connection::RTCPeerConnection`] backed channel and media provider.
pub mod rtc_channel;
pub mod signal;
/// Remote audio tracks and their placement.
pub mod spatial_audio;
pub mod spatializer;
/// World connection is the event loop that owns the mesh.
pub mod world;

#[cfg(test)]
mod test_support;
