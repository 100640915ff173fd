//! Parent side of the control link.
//!
//! The supervisor listens on a fresh output endpoint, spawns the background render process with
//! that address on its command line, relays progress from the output channel to a
//! [`RenderObserver`], and connects back to the child's input endpoint to deliver cancellation.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::foundation::config::RenderConfig;
use crate::foundation::core::FrameRange;
use crate::foundation::error::{RenderLinkError, RenderLinkResult};
use crate::ipc::endpoint::{EndpointAddress, EndpointListener, LineEvent, ProcessEndpoint};
use crate::ipc::message::{ChannelDirection, ControlMessage};

const ACCEPT_SLICE: Duration = Duration::from_millis(50);
const REAP_POLL: Duration = Duration::from_millis(10);

/// One render to run in a background process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderTask {
    /// Project file handed to the child as its positional argument.
    pub project_path: PathBuf,
    /// Script name of the output (writer) node to render.
    pub writer: String,
    /// Frame range override; `None` renders the writer's own range.
    pub frames: Option<FrameRange>,
}

impl RenderTask {
    pub fn new(project_path: impl Into<PathBuf>, writer: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            writer: writer.into(),
            frames: None,
        }
    }

    pub fn with_frames(mut self, frames: FrameRange) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Arguments passed to the background process, after the program name.
    pub fn command_args(&self, ipc_address: &EndpointAddress) -> Vec<String> {
        let mut args = vec![
            self.project_path.to_string_lossy().into_owned(),
            "-b".to_string(),
            "-w".to_string(),
            self.writer.clone(),
        ];
        if let Some(r) = self.frames {
            args.push("--frames".to_string());
            args.push(r.to_string());
        }
        args.push("--IPCpipe".to_string());
        args.push(ipc_address.to_wire());
        args
    }
}

/// Terminal classification of the background process exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0.
    Success,
    /// Normal exit with a non-zero code.
    Failure,
    /// Abnormal termination (signal, crash).
    Crash,
}

impl ExitKind {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Success,
            Some(_) => Self::Failure,
            None => Self::Crash,
        }
    }

    /// Result code surfaced to callers: 0 success, 1 failure, 2 crash.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Crash => 2,
        }
    }
}

/// Final status of one background render.
#[derive(Debug)]
pub struct RenderOutcome {
    pub writer: String,
    pub status: ExitKind,
    /// Raw OS exit code, absent when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Everything the child wrote to stdout and stderr.
    pub captured_log: String,
    /// Error that terminated the output channel loop early (protocol violation, IO).
    pub channel_error: Option<RenderLinkError>,
}

impl RenderOutcome {
    pub fn code(&self) -> i32 {
        self.status.code()
    }
}

/// Callbacks invoked by the supervisor. All have no-op defaults.
///
/// Frame and progress callbacks run on the supervisor's channel thread, in message order.
pub trait RenderObserver: Send + Sync {
    fn on_frame_rendered(&self, _frame: i64) {}
    fn on_progress(&self, _percent: u8) {}
    fn on_finished(&self, _outcome: &RenderOutcome) {}
}

/// Observer that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl RenderObserver for NoopObserver {}

/// Lifecycle of a supervised render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Spawning,
    AwaitingHandshake,
    Connected,
    Running,
    Canceling,
    Finished,
}

/// What a cancel request did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelDisposition {
    /// `ABORT_RENDER` was written to the input channel.
    Sent,
    /// The input channel does not exist yet; the request is replayed once it opens.
    Latched,
    /// The render already finished; nothing was done.
    AlreadyFinished,
}

pub(crate) trait MessageSink {
    fn send_message(&mut self, msg: &ControlMessage) -> RenderLinkResult<()>;
}

impl MessageSink for ProcessEndpoint {
    fn send_message(&mut self, msg: &ControlMessage) -> RenderLinkResult<()> {
        self.send(msg)
    }
}

/// Input channel of the supervisor plus the early-cancel latch.
pub(crate) struct InputLink<S> {
    sink: Option<S>,
    early_cancel: bool,
}

impl<S: MessageSink> InputLink<S> {
    pub(crate) fn new() -> Self {
        Self {
            sink: None,
            early_cancel: false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn early_cancel_pending(&self) -> bool {
        self.early_cancel
    }

    pub(crate) fn request_cancel(&mut self) -> RenderLinkResult<CancelDisposition> {
        match self.sink.as_mut() {
            Some(sink) => {
                sink.send_message(&ControlMessage::AbortRender)?;
                Ok(CancelDisposition::Sent)
            }
            None => {
                self.early_cancel = true;
                Ok(CancelDisposition::Latched)
            }
        }
    }

    /// Install the input channel and replay a latched cancel. Returns `true` if it replayed.
    ///
    /// Only the first channel is kept; later ones are dropped.
    pub(crate) fn attach(&mut self, sink: S) -> RenderLinkResult<bool> {
        if self.sink.is_some() {
            debug!("input channel already open, dropping duplicate");
            return Ok(false);
        }
        self.sink = Some(sink);
        self.replay_pending()
    }

    pub(crate) fn replay_pending(&mut self) -> RenderLinkResult<bool> {
        if !self.early_cancel {
            return Ok(false);
        }
        let Some(sink) = self.sink.as_mut() else {
            return Ok(false);
        };
        self.early_cancel = false;
        sink.send_message(&ControlMessage::AbortRender)?;
        Ok(true)
    }
}

struct LinkState {
    phase: SupervisorState,
    input: InputLink<ProcessEndpoint>,
    process_exited: bool,
}

struct LinkShared {
    state: Mutex<LinkState>,
}

impl LinkShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(LinkState {
                phase: SupervisorState::Spawning,
                input: InputLink::new(),
                process_exited: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_cancel(&self) -> RenderLinkResult<CancelDisposition> {
        let mut st = self.lock();
        if st.phase == SupervisorState::Finished {
            return Ok(CancelDisposition::AlreadyFinished);
        }
        let disposition = st.input.request_cancel()?;
        st.phase = SupervisorState::Canceling;
        Ok(disposition)
    }
}

/// Cloneable handle that cancels a supervised render from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<LinkShared>,
}

impl CancelHandle {
    pub fn request_cancel(&self) -> RenderLinkResult<CancelDisposition> {
        self.shared.request_cancel()
    }
}

/// Owns one background render process and both ends of its control link.
pub struct ForegroundProcessSupervisor {
    task: RenderTask,
    child: Child,
    shared: Arc<LinkShared>,
    channel_thread: Option<JoinHandle<RenderLinkResult<()>>>,
    drains: Vec<JoinHandle<()>>,
    captured: Arc<Mutex<String>>,
    observer: Arc<dyn RenderObserver>,
    // How long a dropped supervisor waits for a cancelled child before killing it.
    reap_grace: Duration,
}

impl ForegroundProcessSupervisor {
    /// Create the output endpoint, start `program` as the background render process and begin
    /// listening for its handshake.
    #[tracing::instrument(skip(program, config, observer), fields(writer = %task.writer))]
    pub fn spawn(
        program: impl AsRef<OsStr>,
        task: RenderTask,
        config: &RenderConfig,
        observer: Arc<dyn RenderObserver>,
    ) -> RenderLinkResult<Self> {
        let shared = Arc::new(LinkShared::new());

        let listener = EndpointListener::bind_unique("fg_output")?;
        let mut cmd = Command::new(program.as_ref());
        cmd.args(task.command_args(listener.address()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            RenderLinkError::process(format!("the render process failed to start: {e}"))
        })?;
        info!(pid = child.id(), "background render process started");
        shared.lock().phase = SupervisorState::AwaitingHandshake;

        let captured = Arc::new(Mutex::new(String::new()));
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(spawn_drain("stdout", stdout, captured.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(spawn_drain("stderr", stderr, captured.clone()));
        }

        let channel_shared = shared.clone();
        let channel_observer = observer.clone();
        let channel_config = config.clone();
        let channel_thread = std::thread::Builder::new()
            .name("renderlink-output".to_string())
            .spawn(move || {
                run_output_channel(listener, &channel_shared, &*channel_observer, &channel_config)
            })
            .map_err(|e| {
                RenderLinkError::process(format!("failed to start output channel thread: {e}"))
            });
        let channel_thread = match channel_thread {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        Ok(Self {
            task,
            child,
            shared,
            channel_thread: Some(channel_thread),
            drains,
            captured,
            observer,
            reap_grace: config.handshake_timeout(),
        })
    }

    pub fn task(&self) -> &RenderTask {
        &self.task
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.lock().phase
    }

    /// `true` when a cancel was requested before the input channel existed and is still pending.
    pub fn early_cancel_pending(&self) -> bool {
        self.shared.lock().input.early_cancel_pending()
    }

    /// `true` once the child's input endpoint has been connected.
    pub fn has_input_channel(&self) -> bool {
        self.shared.lock().input.is_open()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: self.shared.clone(),
        }
    }

    /// Ask the background render to stop cooperatively.
    pub fn request_cancel(&self) -> RenderLinkResult<CancelDisposition> {
        self.shared.request_cancel()
    }

    /// Block until the background process exits, then collect its terminal status.
    pub fn wait(mut self) -> RenderLinkResult<RenderOutcome> {
        let status = self
            .child
            .wait()
            .map_err(|e| RenderLinkError::process(format!("failed to wait for render process: {e}")))?;
        self.mark_finished();
        let channel_error = self.join_threads();

        let status_kind = ExitKind::from_status(status);
        match status_kind {
            ExitKind::Success => info!(writer = %self.task.writer, "background render finished"),
            ExitKind::Failure => warn!(writer = %self.task.writer, %status, "background render failed"),
            ExitKind::Crash => {
                error!(writer = %self.task.writer, %status, "the render process exited after a crash")
            }
        }

        let captured_log = std::mem::take(
            &mut *self
                .captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let outcome = RenderOutcome {
            writer: self.task.writer.clone(),
            status: status_kind,
            exit_code: status.code(),
            captured_log,
            channel_error,
        };
        self.observer.on_finished(&outcome);
        Ok(outcome)
    }
}

impl ForegroundProcessSupervisor {
    fn mark_finished(&self) {
        let mut st = self.shared.lock();
        st.process_exited = true;
        st.phase = SupervisorState::Finished;
    }

    fn join_threads(&mut self) -> Option<RenderLinkError> {
        let channel_error = match self.channel_thread.take().map(JoinHandle::join) {
            Some(Ok(Ok(()))) | None => None,
            Some(Ok(Err(e))) => {
                error!(writer = %self.task.writer, "output channel stopped: {e}");
                Some(e)
            }
            Some(Err(_)) => Some(RenderLinkError::channel("output channel thread panicked")),
        };
        for drain in self.drains.drain(..) {
            if drain.join().is_err() {
                warn!("log drain thread panicked");
            }
        }
        channel_error
    }
}

/// A supervisor dropped before [`ForegroundProcessSupervisor::wait`] cancels its render, reaps
/// the child (killing it once the grace period runs out) and joins its threads.
impl Drop for ForegroundProcessSupervisor {
    fn drop(&mut self) {
        if self.state() == SupervisorState::Finished {
            return;
        }
        warn!(
            writer = %self.task.writer,
            pid = self.child.id(),
            "supervisor dropped while the render was running, cancelling it"
        );
        if let Err(e) = self.shared.request_cancel() {
            debug!("cancel on drop failed: {e}");
        }

        let deadline = Instant::now() + self.reap_grace;
        let exited = loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break true,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(REAP_POLL),
                Ok(None) | Err(_) => break false,
            }
        };
        if !exited {
            warn!(pid = self.child.id(), "render process still running, killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.mark_finished();
        self.join_threads();
    }
}

fn spawn_drain(
    stream: &'static str,
    source: impl Read + Send + 'static,
    captured: Arc<Mutex<String>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    info!(target: "renderlink::child", stream, "{line}");
                    let mut log = captured.lock().unwrap_or_else(PoisonError::into_inner);
                    log.push_str(line);
                    log.push('\n');
                }
                Err(e) => {
                    debug!(stream, "child log drain stopped: {e}");
                    break;
                }
            }
        }
    })
}

fn accept_output(
    listener: &mut EndpointListener,
    shared: &LinkShared,
    timeout: Duration,
) -> RenderLinkResult<Option<ProcessEndpoint>> {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline || shared.lock().process_exited {
            return Ok(None);
        }
        if let Some(endpoint) = listener.accept_timeout(ACCEPT_SLICE.min(deadline - now))? {
            return Ok(Some(endpoint));
        }
    }
}

fn run_output_channel(
    mut listener: EndpointListener,
    shared: &LinkShared,
    observer: &dyn RenderObserver,
    config: &RenderConfig,
) -> RenderLinkResult<()> {
    let Some(mut output) = accept_output(&mut listener, shared, config.handshake_timeout())? else {
        warn!("background process did not connect, progress and cancellation unavailable");
        return Ok(());
    };

    loop {
        let line = match output.read_line_blocking()? {
            LineEvent::Line(line) => line,
            LineEvent::Closed => {
                debug!("background process closed the output channel");
                return Ok(());
            }
            LineEvent::Timeout => continue,
        };

        match ControlMessage::parse_on(&line, ChannelDirection::Output)? {
            ControlMessage::ServerCreated(address) => {
                let address = EndpointAddress::from_wire(&address);
                match ProcessEndpoint::connect_with_retry(
                    &address,
                    config.connect_attempts,
                    config.connect_retry_delay(),
                ) {
                    Ok(input) => {
                        let mut st = shared.lock();
                        let replayed = st.input.attach(input)?;
                        if replayed {
                            info!("replayed early cancel request");
                            st.phase = SupervisorState::Canceling;
                        } else if st.phase == SupervisorState::AwaitingHandshake {
                            st.phase = SupervisorState::Connected;
                        }
                    }
                    Err(e) => warn!(%address, "failed to open input channel, cancellation unavailable: {e}"),
                }
            }
            ControlMessage::RenderingStarted => {
                let mut st = shared.lock();
                if st.input.replay_pending()? {
                    info!("replayed early cancel request");
                    st.phase = SupervisorState::Canceling;
                } else if matches!(
                    st.phase,
                    SupervisorState::AwaitingHandshake | SupervisorState::Connected
                ) {
                    st.phase = SupervisorState::Running;
                }
            }
            ControlMessage::FrameRendered(frame) => {
                {
                    let mut st = shared.lock();
                    if st.phase == SupervisorState::Connected {
                        st.phase = SupervisorState::Running;
                    }
                }
                observer.on_frame_rendered(frame);
            }
            ControlMessage::Progress(percent) => observer.on_progress(percent),
            ControlMessage::RenderingFinished => debug!("background render loop finished"),
            // parse_on already rejects input-only messages on this channel.
            ControlMessage::AbortRender => {}
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ipc/foreground.rs"]
mod tests;
