use serde::{Deserialize, Serialize};

use crate::{
    channel::{AudioAttachment, MediaProvider},
    peer_link::PeerLink,
    presence::{PresenceRecord, Vector3},
};

/// Placement of a remote agent relative to the local listener.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelativeOffset {
    pub position_delta: Vector3,
    pub orientation_delta: Vector3,
}

impl RelativeOffset {
    pub fn distance(&self) -> f64 {
        self.position_delta.length()
    }
}

pub fn compute_relative_offset(local: &PresenceRecord, remote: &PresenceRecord) -> RelativeOffset {
    RelativeOffset {
        position_delta: remote.position - local.position,
        orientation_delta: remote.orientation - local.orientation,
    }
}

/// Places one attachment. Returns false when the link has no audio or no remote presence yet.
pub(crate) async fn place(
    media: &dyn MediaProvider,
    local: &PresenceRecord,
    remote: Option<&PresenceRecord>,
    attachment: Option<&AudioAttachment>,
) -> bool {
    let (Some(remote), Some(attachment)) = (remote, attachment) else {
        return false;
    };
    let offset = compute_relative_offset(local, remote);
    tracing::trace!(
        "placing audio {} for {} at distance {:.2}",
        attachment.id,
        remote.agent_id,
        offset.distance()
    );
    media.place_audio(attachment, &offset).await;
    true
}

/// Re-places every link against `local`. Returns the number of attachments updated.
pub(crate) async fn recompute_all<'a>(
    media: &dyn MediaProvider,
    local: &PresenceRecord,
    links: impl Iterator<Item = &'a PeerLink>,
) -> usize {
    let mut placed = 0;
    for link in links {
        if place(media, local, link.remote_presence(), link.audio_attachment()).await {
            placed += 1;
        }
    }
    placed
}
