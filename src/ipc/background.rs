//! Child side of the control link.
//!
//! The agent connects back to the supervisor's output endpoint, announces its own input endpoint
//! with `SERVER_CREATED`, and then listens for `ABORT_RENDER` on a dedicated thread so the render
//! thread never blocks on the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::foundation::config::RenderConfig;
use crate::foundation::error::{RenderLinkError, RenderLinkResult};
use crate::ipc::endpoint::{EndpointAddress, EndpointListener, LineEvent, ProcessEndpoint};
use crate::ipc::message::{ChannelDirection, ControlMessage};
use crate::render::abort::RenderAbort;

/// Runs inside the background render process and owns both of its channel ends.
pub struct BackgroundProcessAgent {
    output: Mutex<Option<ProcessEndpoint>>,
    input_listener: Option<EndpointListener>,
    shared: Arc<LoopShared>,
    thread: Option<JoinHandle<()>>,
}

struct LoopShared {
    must_quit: AtomicBool,
    exited: Mutex<bool>,
    exited_cv: Condvar,
    error: Mutex<Option<RenderLinkError>>,
}

impl LoopShared {
    fn mark_exited(&self) {
        let mut exited = self.exited.lock().unwrap_or_else(PoisonError::into_inner);
        *exited = true;
        self.exited_cv.notify_all();
    }
}

impl BackgroundProcessAgent {
    /// Perform the child half of the handshake.
    ///
    /// Never fails: when a step of the handshake does not complete, the missing capability
    /// (progress reporting or cancellation) is logged as unavailable and the render proceeds.
    #[tracing::instrument(skip(config, abort))]
    pub fn start(output_address: &EndpointAddress, config: &RenderConfig, abort: RenderAbort) -> Self {
        let shared = Arc::new(LoopShared {
            must_quit: AtomicBool::new(false),
            exited: Mutex::new(false),
            exited_cv: Condvar::new(),
            error: Mutex::new(None),
        });
        let mut agent = Self {
            output: Mutex::new(None),
            input_listener: None,
            shared,
            thread: None,
        };

        let mut output = match ProcessEndpoint::connect_with_retry(
            output_address,
            config.connect_attempts,
            config.connect_retry_delay(),
        ) {
            Ok(output) => output,
            Err(e) => {
                warn!("output channel unavailable, progress and cancellation disabled: {e}");
                return agent;
            }
        };

        let mut listener = match EndpointListener::bind_unique("bg_input") {
            Ok(listener) => listener,
            Err(e) => {
                warn!("failed to create input endpoint, cancellation disabled: {e}");
                agent.output = Mutex::new(Some(output));
                return agent;
            }
        };

        let announce = ControlMessage::ServerCreated(listener.address().to_wire());
        if let Err(e) = output.send(&announce) {
            warn!("failed to announce input endpoint, progress and cancellation disabled: {e}");
            return agent;
        }
        agent.output = Mutex::new(Some(output));

        match listener.accept_timeout(config.handshake_timeout()) {
            Ok(Some(input)) => {
                let shared = agent.shared.clone();
                let poll = config.poll_interval();
                let spawned = std::thread::Builder::new()
                    .name("renderlink-input".to_string())
                    .spawn(move || run_input_loop(input, shared, abort, poll));
                match spawned {
                    Ok(handle) => agent.thread = Some(handle),
                    Err(e) => {
                        warn!("failed to start input channel thread, cancellation disabled: {e}")
                    }
                }
            }
            Ok(None) => warn!(
                timeout_ms = config.handshake_timeout_ms,
                "supervisor did not connect to the input endpoint, cancellation disabled"
            ),
            Err(e) => warn!("input endpoint accept failed, cancellation disabled: {e}"),
        }
        agent.input_listener = Some(listener);
        agent
    }

    pub fn has_output_channel(&self) -> bool {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// `true` while the input loop is running and cancellation can be received.
    pub fn has_input_channel(&self) -> bool {
        self.thread.is_some()
            && !*self
                .shared
                .exited
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn input_address(&self) -> Option<&EndpointAddress> {
        self.input_listener.as_ref().map(|l| l.address())
    }

    /// Send one message to the supervisor.
    ///
    /// Returns `false` when there is no output channel. A write failure closes the channel for
    /// the rest of the render; it is never fatal to the render itself.
    pub fn write_to_output_channel(&self, msg: &ControlMessage) -> bool {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(endpoint) = output.as_mut() else {
            return false;
        };
        match endpoint.send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("output channel lost, further progress will not be reported: {e}");
                *output = None;
                false
            }
        }
    }

    /// Stop the input loop, wait for it to acknowledge, and release both endpoints.
    ///
    /// Returns the error that terminated the input loop, if any.
    pub fn shutdown(mut self) -> Option<RenderLinkError> {
        self.teardown();
        self.shared
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn teardown(&mut self) {
        let Some(handle) = self.thread.take() else {
            self.release_endpoints();
            return;
        };

        self.shared.must_quit.store(true, Ordering::SeqCst);
        {
            let mut exited = self
                .shared
                .exited
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            while !*exited {
                exited = self
                    .shared
                    .exited_cv
                    .wait(exited)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        if handle.join().is_err() {
            error!("input channel thread panicked");
        }
        self.release_endpoints();
    }

    fn release_endpoints(&mut self) {
        self.input_listener = None;
        *self.output.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for BackgroundProcessAgent {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_input_loop(
    mut input: ProcessEndpoint,
    shared: Arc<LoopShared>,
    abort: RenderAbort,
    poll: Duration,
) {
    let res = input_loop(&mut input, &shared, &abort, poll);
    if let Err(e) = res {
        error!("input channel loop stopped: {e}");
        *shared.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
    }
    drop(input);
    shared.mark_exited();
}

fn input_loop(
    input: &mut ProcessEndpoint,
    shared: &LoopShared,
    abort: &RenderAbort,
    poll: Duration,
) -> RenderLinkResult<()> {
    loop {
        if shared.must_quit.load(Ordering::SeqCst) {
            debug!("input channel loop asked to quit");
            return Ok(());
        }

        match input.poll_line(poll)? {
            LineEvent::Timeout => {}
            LineEvent::Closed => {
                debug!("supervisor closed the input channel");
                return Ok(());
            }
            LineEvent::Line(line) => {
                // Only ABORT_RENDER is valid on this channel; anything else is fatal.
                let msg = ControlMessage::parse_on(&line, ChannelDirection::Input)?;
                info!(message = %msg, "abort requested by supervisor");
                abort.request();
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ipc/background.rs"]
mod tests;
