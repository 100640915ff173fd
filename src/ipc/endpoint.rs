use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::foundation::error::{ProtocolError, RenderLinkError, RenderLinkResult};
use crate::ipc::message::ControlMessage;

const ACCEPT_POLL: Duration = Duration::from_millis(5);
const READ_CHUNK: usize = 4096;

/// Longest control line accepted, terminator excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

static NEXT_ENDPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Filesystem name of a local endpoint (a Unix domain socket path).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EndpointAddress(PathBuf);

impl EndpointAddress {
    /// A fresh, process-unique address in the system temp dir.
    pub fn unique(role: &str) -> Self {
        let seq = NEXT_ENDPOINT_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(std::env::temp_dir().join(format!(
            "renderlink_{role}_{}_{}_{seq}.sock",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        )))
    }

    /// Address as announced on the wire or on the command line.
    pub fn from_wire(s: &str) -> Self {
        Self(PathBuf::from(s))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Text form used on the wire and on the command line.
    pub fn to_wire(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Outcome of waiting for one line on an endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete line, terminator stripped.
    Line(String),
    /// No complete line arrived before the timeout.
    Timeout,
    /// The peer closed the stream. A trailing partial line is discarded.
    Closed,
}

/// Listening side of an endpoint. Accepts exactly one peer.
pub struct EndpointListener {
    listener: UnixListener,
    address: EndpointAddress,
    accepted: bool,
}

impl EndpointListener {
    /// Start listening at `address`, replacing a stale socket file if one exists.
    pub fn bind(address: EndpointAddress) -> RenderLinkResult<Self> {
        if address.as_path().exists() {
            let _ = std::fs::remove_file(address.as_path());
        }
        let listener = UnixListener::bind(address.as_path()).map_err(|e| {
            RenderLinkError::channel(format!("failed to listen on '{address}': {e}"))
        })?;
        listener.set_nonblocking(true).map_err(|e| {
            RenderLinkError::channel(format!("failed to configure listener '{address}': {e}"))
        })?;
        debug!(%address, "endpoint listening");
        Ok(Self {
            listener,
            address,
            accepted: false,
        })
    }

    /// Listen on a fresh [`EndpointAddress::unique`] address.
    pub fn bind_unique(role: &str) -> RenderLinkResult<Self> {
        Self::bind(EndpointAddress::unique(role))
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// `true` once the single peer has been accepted.
    pub fn has_accepted(&self) -> bool {
        self.accepted
    }

    /// Wait up to `timeout` for the peer connection.
    ///
    /// Returns `Ok(None)` on timeout. Once a peer has been accepted every later call returns
    /// `Ok(None)` and silently drops whatever connected in the meantime.
    pub fn accept_timeout(&mut self, timeout: Duration) -> RenderLinkResult<Option<ProcessEndpoint>> {
        if self.accepted {
            self.reject_extra();
            return Ok(None);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false).map_err(|e| {
                        RenderLinkError::channel(format!(
                            "failed to configure connection on '{}': {e}",
                            self.address
                        ))
                    })?;
                    self.accepted = true;
                    debug!(address = %self.address, "endpoint accepted peer");
                    return Ok(Some(ProcessEndpoint::new(stream)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(RenderLinkError::channel(format!(
                        "accept failed on '{}': {e}",
                        self.address
                    )));
                }
            }
        }
    }

    /// Drop pending connection attempts made after the first peer. Returns how many were dropped.
    pub fn reject_extra(&mut self) -> usize {
        let mut dropped = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    drop(stream);
                    dropped += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        if dropped > 0 {
            debug!(address = %self.address, dropped, "ignored extra connection attempts");
        }
        dropped
    }
}

impl Drop for EndpointListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.address.as_path());
    }
}

/// One connected end of a control channel: line framed, read with timeouts.
pub struct ProcessEndpoint {
    stream: UnixStream,
    pending: Vec<u8>,
    // Prefix of `pending` known to hold no terminator.
    scanned: usize,
}

impl ProcessEndpoint {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            scanned: 0,
        }
    }

    /// Connect to a listening endpoint.
    pub fn connect(address: &EndpointAddress) -> RenderLinkResult<Self> {
        let stream = UnixStream::connect(address.as_path()).map_err(|e| {
            RenderLinkError::channel(format!("failed to connect to '{address}': {e}"))
        })?;
        Ok(Self::new(stream))
    }

    /// Connect, retrying while the listener may not exist yet.
    pub fn connect_with_retry(
        address: &EndpointAddress,
        attempts: u32,
        delay: Duration,
    ) -> RenderLinkResult<Self> {
        let attempts = attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match Self::connect(address) {
                Ok(endpoint) => return Ok(endpoint),
                Err(e) => {
                    debug!(%address, attempt, "connect attempt failed: {e}");
                    last_err = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| RenderLinkError::channel("no connection attempt made")))
    }

    /// Write one message as a complete line.
    pub fn send(&mut self, msg: &ControlMessage) -> RenderLinkResult<()> {
        self.stream
            .write_all(msg.to_line().as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| RenderLinkError::channel(format!("failed to send {}: {e}", msg.kind())))
    }

    #[cfg(test)]
    pub(crate) fn stream_write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
        self.stream.flush().unwrap();
    }

    /// Wait up to `timeout` for one complete line.
    pub fn poll_line(&mut self, timeout: Duration) -> RenderLinkResult<LineEvent> {
        self.read_line(Some(Instant::now() + timeout))
    }

    /// Block until a complete line arrives or the peer closes the stream.
    pub fn read_line_blocking(&mut self) -> RenderLinkResult<LineEvent> {
        self.read_line(None)
    }

    fn read_line(&mut self, deadline: Option<Instant>) -> RenderLinkResult<LineEvent> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.take_buffered_line()? {
                return Ok(LineEvent::Line(line));
            }

            let read_timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(LineEvent::Timeout);
                    }
                    // A zero read timeout means "block forever" to the OS.
                    Some((deadline - now).max(Duration::from_millis(1)))
                }
                None => None,
            };
            self.stream
                .set_read_timeout(read_timeout)
                .map_err(|e| RenderLinkError::channel(format!("failed to set read timeout: {e}")))?;

            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if !self.pending.is_empty() {
                        warn!(
                            bytes = self.pending.len(),
                            "peer closed the channel mid-line, dropping partial message"
                        );
                        self.clear_pending();
                    }
                    return Ok(LineEvent::Closed);
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    if deadline.is_some() {
                        return Ok(LineEvent::Timeout);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    self.clear_pending();
                    return Ok(LineEvent::Closed);
                }
                Err(e) => {
                    return Err(RenderLinkError::channel(format!("channel read failed: {e}")));
                }
            }
        }
    }

    fn take_buffered_line(&mut self) -> RenderLinkResult<Option<String>> {
        let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.pending.len();
            if self.pending.len() > MAX_LINE_BYTES {
                let bytes = self.pending.len();
                self.clear_pending();
                warn!(bytes, "unterminated control line over the size limit");
                return Err(ProtocolError::LineTooLong {
                    limit: MAX_LINE_BYTES,
                }
                .into());
            }
            return Ok(None);
        };
        let pos = self.scanned + offset;
        self.scanned = 0;
        if pos > MAX_LINE_BYTES {
            self.clear_pending();
            return Err(ProtocolError::LineTooLong {
                limit: MAX_LINE_BYTES,
            }
            .into());
        }
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.scanned = 0;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ipc/endpoint.rs"]
mod tests;
