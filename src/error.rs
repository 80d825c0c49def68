use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    WebRTCError(#[from] webrtc::Error),
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    SignalingError(#[from] SignalingError),
    #[error(transparent)]
    NegotiationError(#[from] NegotiationError),
    #[error(transparent)]
    MediaError(#[from] MediaError),
    #[error(transparent)]
    WorldError(#[from] WorldError),
}

/// Failures of the signaling relay or the presence transport.
#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SignalingError {
    pub kind: SignalingErrorKind,
    pub message: String,
}

/// Failures while creating or applying session descriptions.
#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct NegotiationError {
    pub kind: NegotiationErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WorldError {
    pub kind: WorldErrorKind,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignalingErrorKind {
    #[error("peer unreachable error")]
    PeerUnreachableError,
    #[error("send error")]
    SendError,
    #[error("publish error")]
    PublishError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationErrorKind {
    #[error("peer connection error")]
    PeerConnectionError,
    #[error("local description error")]
    LocalDescriptionError,
    #[error("remote description error")]
    RemoteDescriptionError,
    #[error("ice candidate error")]
    ICECandidateError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MediaErrorKind {
    #[error("stream not found error")]
    StreamNotFoundError,
    #[error("attachment not found error")]
    AttachmentNotFoundError,
    #[error("data channel not open error")]
    DataChannelNotOpenError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WorldErrorKind {
    #[error("invalid agent id error")]
    InvalidAgentIdError,
    #[error("peer not found error")]
    PeerNotFoundError,
    #[error("disconnected error")]
    DisconnectedError,
}

impl Error {
    pub fn new_signaling(message: String, kind: SignalingErrorKind) -> Error {
        Error::SignalingError(SignalingError { kind, message })
    }

    pub fn new_negotiation(message: String, kind: NegotiationErrorKind) -> Error {
        Error::NegotiationError(NegotiationError { kind, message })
    }

    pub fn new_media(message: String, kind: MediaErrorKind) -> Error {
        Error::MediaError(MediaError { kind, message })
    }

    pub fn new_world(message: String, kind: WorldErrorKind) -> Error {
        Error::WorldError(WorldError { kind, message })
    }
}

impl fmt::Debug for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("worldmesh::SignalingError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("worldmesh::NegotiationError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("worldmesh::MediaError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("worldmesh::WorldError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = Error::new_world("agent id is empty".to_string(), WorldErrorKind::InvalidAgentIdError);
        assert_eq!(err.to_string(), "invalid agent id error: agent id is empty");
    }

    #[test]
    fn test_debug_uses_crate_prefix() {
        let err = SignalingError {
            kind: SignalingErrorKind::SendError,
            message: "relay closed".to_string(),
        };
        let debug = format!("{:?}", err);
        assert!(debug.starts_with("worldmesh::SignalingError"));
        assert!(debug.contains("relay closed"));
    }
}
