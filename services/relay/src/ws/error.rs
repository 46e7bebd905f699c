use super::codec::ProtocolError;

/// Why a relay track (or the connection setup) ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The client sent a frame with a mime type the relay does not accept.
    #[error("protocol violation: unsupported mime type '{0}'")]
    ProtocolViolation(String),
    #[error("invalid client frame: {0}")]
    Codec(ProtocolError),
    #[error("agent backend failed: {0:#}")]
    Backend(anyhow::Error),
    #[error("connection transport failed: {0}")]
    Transport(String),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("relay task panicked: {0}")]
    Panicked(String),
}

impl From<ProtocolError> for RelayError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedMimeType(mime_type) => Self::ProtocolViolation(mime_type),
            other => Self::Codec(other),
        }
    }
}
