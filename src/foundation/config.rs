use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;

use crate::foundation::error::{RenderLinkError, RenderLinkResult};

/// Process-wide render settings, passed explicitly to every component that needs them.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Render worker count: `-1` renders inline on the calling thread, `0` picks automatically.
    pub thread_count: i32,
    /// Queue background renders instead of running them concurrently.
    pub render_queuing_enabled: bool,
    /// Bound on waiting for the peer to connect during the channel handshake.
    pub handshake_timeout_ms: u64,
    /// Poll timeout of one iteration of the background agent's input loop.
    pub poll_interval_ms: u64,
    /// Connection attempts made against the supervisor's output endpoint.
    pub connect_attempts: u32,
    /// Delay between two connection attempts.
    pub connect_retry_delay_ms: u64,
    /// Frames rendered per parallel batch before progress is reported.
    pub chunk_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            render_queuing_enabled: false,
            handshake_timeout_ms: 5_000,
            poll_interval_ms: 100,
            connect_attempts: 20,
            connect_retry_delay_ms: 50,
            chunk_size: 8,
        }
    }
}

impl RenderConfig {
    /// Parse a JSON config and validate it.
    pub fn from_json_str(s: &str) -> RenderLinkResult<Self> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| RenderLinkError::serde(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a JSON config file.
    pub fn from_path(path: &Path) -> RenderLinkResult<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        Self::from_json_str(&s)
    }

    /// Validate value ranges.
    pub fn validate(&self) -> RenderLinkResult<()> {
        if self.thread_count < -1 {
            return Err(RenderLinkError::validation(
                "thread_count must be -1 (inline), 0 (auto) or a positive worker count",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(RenderLinkError::validation("poll_interval_ms must be non-zero"));
        }
        if self.connect_attempts == 0 {
            return Err(RenderLinkError::validation("connect_attempts must be >= 1"));
        }
        Ok(())
    }

    /// `true` when renders run synchronously on the calling thread.
    pub fn renders_inline(&self) -> bool {
        self.thread_count == -1
    }

    /// Worker count for a dedicated pool, `None` meaning "let rayon decide".
    pub fn worker_threads(&self) -> Option<usize> {
        match self.thread_count {
            n if n > 0 => Some(n as usize),
            _ => None,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;
