//! Synchronous façade over an asynchronous render engine.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::{
    foundation::config::RenderConfig,
    foundation::core::FrameRange,
    foundation::error::{RenderLinkError, RenderLinkResult},
    ipc::background::BackgroundProcessAgent,
    project::model::Project,
    render::abort::RenderAbort,
    render::sequence::{SequenceRenderer, SequenceStats},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Waiting,
    Done,
}

struct Completion {
    state: Mutex<CoordinatorState>,
    cv: Condvar,
}

impl Completion {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Given to the engine; signals that the full-sequence render is over.
#[derive(Clone)]
pub struct CompletionHandle {
    shared: Arc<Completion>,
}

impl CompletionHandle {
    /// Wake the blocked coordinator.
    ///
    /// Returns `false` when nobody is waiting, e.g. on a second notification.
    pub fn notify_render_finished(&self) -> bool {
        let mut state = self.shared.lock();
        if *state != CoordinatorState::Waiting {
            return false;
        }
        *state = CoordinatorState::Done;
        self.shared.cv.notify_one();
        true
    }
}

/// Something that can render a full sequence and report completion later.
pub trait RenderEngine {
    /// Start the render. `done` must be notified exactly once when it ends, cancelled or not,
    /// unless the engine renders inline.
    fn render_full_sequence(&self, done: CompletionHandle) -> RenderLinkResult<()>;
}

/// Blocks the caller until an engine's full-sequence render completes.
///
/// There is no timeout: an engine that never notifies leaves the caller blocked.
pub struct BlockingRenderCoordinator {
    config: RenderConfig,
    shared: Arc<Completion>,
}

impl BlockingRenderCoordinator {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Completion {
                state: Mutex::new(CoordinatorState::Idle),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.shared.lock()
    }

    pub fn completion_handle(&self) -> CompletionHandle {
        CompletionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Render the full sequence and wait for the engine's completion notification.
    ///
    /// With `thread_count == -1` the engine is expected to render inline and this returns as
    /// soon as the engine call does.
    #[tracing::instrument(skip_all)]
    pub fn render_full_sequence_blocking(&self, engine: &dyn RenderEngine) -> RenderLinkResult<()> {
        // Enter Waiting before the engine starts: it may notify before the wait below.
        *self.shared.lock() = CoordinatorState::Waiting;

        if let Err(e) = engine.render_full_sequence(self.completion_handle()) {
            *self.shared.lock() = CoordinatorState::Done;
            return Err(e);
        }

        if self.config.renders_inline() {
            debug!("inline render returned");
            *self.shared.lock() = CoordinatorState::Done;
            return Ok(());
        }

        let mut state = self.shared.lock();
        while *state == CoordinatorState::Waiting {
            state = self
                .shared
                .cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        debug!("render finished notification received");
        Ok(())
    }
}

type ResultSlot = Arc<Mutex<Option<RenderLinkResult<SequenceStats>>>>;

/// [`RenderEngine`] running a [`SequenceRenderer`] on its own thread, or inline when the
/// configuration asks for it.
pub struct SequenceEngine {
    project: Arc<Project>,
    writer: String,
    frames: Option<FrameRange>,
    config: RenderConfig,
    abort: RenderAbort,
    agent: Option<Arc<BackgroundProcessAgent>>,
    result: ResultSlot,
}

struct SequenceJob {
    project: Arc<Project>,
    writer: String,
    frames: Option<FrameRange>,
    config: RenderConfig,
    abort: RenderAbort,
    agent: Option<Arc<BackgroundProcessAgent>>,
    result: ResultSlot,
}

impl SequenceJob {
    fn run(self) {
        let Self {
            project,
            writer,
            frames,
            config,
            abort,
            agent,
            result,
        } = self;
        let outcome = SequenceRenderer::new(&project, &writer, &config, abort).and_then(|r| {
            let r = match frames {
                Some(range) => r.with_frames(range),
                None => r,
            };
            let r = match agent.as_deref() {
                Some(agent) => r.with_agent(agent),
                None => r,
            };
            r.render()
        });
        if let Err(e) = &outcome {
            error!(%writer, "sequence render failed: {e}");
        }
        // Release the agent before completion is signalled so the caller can reclaim it.
        drop(agent);
        *result.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }
}

impl SequenceEngine {
    pub fn new(project: Arc<Project>, writer: &str, config: RenderConfig, abort: RenderAbort) -> Self {
        Self {
            project,
            writer: writer.to_string(),
            frames: None,
            config,
            abort,
            agent: None,
            result: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_frames(mut self, frames: FrameRange) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_agent(mut self, agent: Arc<BackgroundProcessAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Drop the engine's own agent handle.
    pub fn release_agent(&mut self) {
        self.agent = None;
    }

    /// Result of the last completed render.
    pub fn take_result(&self) -> Option<RenderLinkResult<SequenceStats>> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn job(&self) -> SequenceJob {
        SequenceJob {
            project: self.project.clone(),
            writer: self.writer.clone(),
            frames: self.frames,
            config: self.config.clone(),
            abort: self.abort.clone(),
            agent: self.agent.clone(),
            result: self.result.clone(),
        }
    }
}

impl RenderEngine for SequenceEngine {
    fn render_full_sequence(&self, done: CompletionHandle) -> RenderLinkResult<()> {
        let job = self.job();
        if self.config.renders_inline() {
            job.run();
            done.notify_render_finished();
            return Ok(());
        }
        std::thread::Builder::new()
            .name("renderlink-render".to_string())
            .spawn(move || {
                job.run();
                done.notify_render_finished();
            })
            .map(|_| ())
            .map_err(|e| RenderLinkError::render(format!("failed to start render thread: {e}")))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/blocking.rs"]
mod tests;
