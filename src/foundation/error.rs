/// Convenience result type used across renderlink.
pub type RenderLinkResult<T> = Result<T, RenderLinkError>;

/// Top-level error taxonomy used by the render orchestration APIs.
#[derive(thiserror::Error, Debug)]
pub enum RenderLinkError {
    /// Invalid user-provided configuration, project or argument data.
    #[error("validation error: {0}")]
    Validation(String),

    /// A control channel peer sent a line that violates the wire contract.
    ///
    /// Fatal for the receiving side: the message loop stops at the first violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO failures on an IPC endpoint (bind, connect, read, write).
    #[error("channel error: {0}")]
    Channel(String),

    /// The background render process could not be started or waited on.
    #[error("process error: {0}")]
    Process(String),

    /// Failures while rendering a frame sequence.
    #[error("render error: {0}")]
    Render(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RenderLinkError {
    /// Build a [`RenderLinkError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`RenderLinkError::Channel`] value.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Build a [`RenderLinkError::Process`] value.
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Build a [`RenderLinkError::Render`] value.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Build a [`RenderLinkError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Return the wrapped [`ProtocolError`] when this is a protocol violation.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

/// Violations of the line-based control protocol.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line does not start with any known message prefix.
    #[error("unrecognized message '{0}'")]
    UnknownMessage(String),

    /// The prefix is known but its payload could not be parsed.
    #[error("invalid payload '{payload}' for {kind}")]
    InvalidPayload {
        /// Wire name of the message kind.
        kind: &'static str,
        /// Raw payload text.
        payload: String,
    },

    /// A well-formed message arrived on a channel that never carries it.
    #[error("{kind} is not valid on the {channel} channel")]
    WrongChannel {
        /// Wire name of the message kind.
        kind: &'static str,
        /// Channel that received it (`input` or `output`).
        channel: &'static str,
    },

    /// More than `limit` bytes arrived without a line terminator.
    #[error("line exceeds {limit} bytes without a terminator")]
    LineTooLong {
        /// Maximum accepted line length in bytes.
        limit: usize,
    },
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
