use std::fmt;
use std::str::FromStr;

use crate::foundation::error::ProtocolError;

const FRAME_RENDERED: &str = "FRAME_RENDERED:";
const PROGRESS: &str = "PROGRESS:";
const RENDERING_FINISHED: &str = "RENDERING_FINISHED";
const RENDERING_STARTED: &str = "RENDERING_STARTED";
const SERVER_CREATED: &str = "SERVER_CREATED:";
const ABORT_RENDER: &str = "ABORT_RENDER";

/// Which of the two control channels a message travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelDirection {
    /// Background process -> supervisor (progress, handshake).
    Output,
    /// Supervisor -> background process (cancellation).
    Input,
}

impl ChannelDirection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Input => "input",
        }
    }
}

/// One line of the control protocol.
///
/// On the wire every message is a single UTF-8 line terminated by `\n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// A frame finished rendering.
    FrameRendered(i64),
    /// Render progress in percent, `0..=100`.
    Progress(u8),
    /// The render loop ended. Informational: process exit is the real completion signal.
    RenderingFinished,
    /// The render loop started.
    RenderingStarted,
    /// The background process is listening for the input channel at this address.
    ServerCreated(String),
    /// Cooperative cancellation request.
    AbortRender,
}

impl ControlMessage {
    /// Wire name of the message kind, used in errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FrameRendered(_) => "FRAME_RENDERED",
            Self::Progress(_) => "PROGRESS",
            Self::RenderingFinished => RENDERING_FINISHED,
            Self::RenderingStarted => RENDERING_STARTED,
            Self::ServerCreated(_) => "SERVER_CREATED",
            Self::AbortRender => ABORT_RENDER,
        }
    }

    /// Channel this message kind is allowed on.
    pub fn direction(&self) -> ChannelDirection {
        match self {
            Self::AbortRender => ChannelDirection::Input,
            _ => ChannelDirection::Output,
        }
    }

    /// Parse one line (without its terminator) received on `channel`.
    ///
    /// Anything that is not a known message for that channel is a protocol violation.
    pub fn parse_on(line: &str, channel: ChannelDirection) -> Result<Self, ProtocolError> {
        let msg = line.parse::<Self>()?;
        if msg.direction() != channel {
            return Err(ProtocolError::WrongChannel {
                kind: msg.kind(),
                channel: channel.name(),
            });
        }
        Ok(msg)
    }

    /// Encoded line including the trailing `\n`.
    pub fn to_line(&self) -> String {
        let mut s = self.to_string();
        s.push('\n');
        s
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameRendered(frame) => write!(f, "{FRAME_RENDERED}{frame}"),
            Self::Progress(pct) => write!(f, "{PROGRESS}{pct}"),
            Self::RenderingFinished => f.write_str(RENDERING_FINISHED),
            Self::RenderingStarted => f.write_str(RENDERING_STARTED),
            Self::ServerCreated(addr) => write!(f, "{SERVER_CREATED}{addr}"),
            Self::AbortRender => f.write_str(ABORT_RENDER),
        }
    }
}

impl FromStr for ControlMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(payload) = line.strip_prefix(FRAME_RENDERED) {
            let frame = strict_number::<i64>(payload)
                .ok_or_else(|| invalid("FRAME_RENDERED", payload))?;
            return Ok(Self::FrameRendered(frame));
        }
        if let Some(payload) = line.strip_prefix(PROGRESS) {
            let pct = strict_number::<u8>(payload)
                .filter(|p| *p <= 100)
                .ok_or_else(|| invalid("PROGRESS", payload))?;
            return Ok(Self::Progress(pct));
        }
        if let Some(payload) = line.strip_prefix(SERVER_CREATED) {
            if payload.is_empty() {
                return Err(invalid("SERVER_CREATED", payload));
            }
            return Ok(Self::ServerCreated(payload.to_string()));
        }

        match line {
            RENDERING_FINISHED => Ok(Self::RenderingFinished),
            RENDERING_STARTED => Ok(Self::RenderingStarted),
            ABORT_RENDER => Ok(Self::AbortRender),
            other => Err(ProtocolError::UnknownMessage(other.to_string())),
        }
    }
}

/// Decimal payload exactly as sent: no padding, no `+` sign.
fn strict_number<T: FromStr>(payload: &str) -> Option<T> {
    if payload.starts_with('+') || payload.trim() != payload {
        return None;
    }
    payload.parse().ok()
}

fn invalid(kind: &'static str, payload: &str) -> ProtocolError {
    ProtocolError::InvalidPayload {
        kind,
        payload: payload.to_string(),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ipc/message.rs"]
mod tests;
