//! Launching several background renders, optionally one at a time.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::foundation::config::RenderConfig;
use crate::foundation::error::RenderLinkResult;
use crate::ipc::foreground::{ForegroundProcessSupervisor, RenderObserver, RenderOutcome, RenderTask};

enum Slot {
    Queued(RenderTask),
    Running(ForegroundProcessSupervisor),
}

/// Submission-ordered set of background renders.
///
/// With `render_queuing_enabled`, a task submitted while another render is active waits in the
/// queue and is launched once everything before it has finished. Otherwise every task is spawned
/// as soon as it is submitted.
pub struct RenderQueue {
    program: PathBuf,
    config: RenderConfig,
    observer: Arc<dyn RenderObserver>,
    slots: Vec<Slot>,
}

impl RenderQueue {
    pub fn new(
        program: impl Into<PathBuf>,
        config: RenderConfig,
        observer: Arc<dyn RenderObserver>,
    ) -> Self {
        Self {
            program: program.into(),
            config,
            observer,
            slots: Vec::new(),
        }
    }

    /// Launch `task`, or queue it when queuing is enabled and a render is already active.
    ///
    /// Returns the task's position in submission order.
    pub fn submit(&mut self, task: RenderTask) -> RenderLinkResult<usize> {
        let index = self.slots.len();
        if self.config.render_queuing_enabled && self.active_count() > 0 {
            info!(writer = %task.writer, position = index, "render queued");
            self.slots.push(Slot::Queued(task));
        } else {
            let supervisor = self.launch(task)?;
            self.slots.push(Slot::Running(supervisor));
        }
        Ok(index)
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Running(_)))
            .count()
    }

    pub fn queued_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Queued(_)))
            .count()
    }

    /// Cancel every running render and forget the queued ones.
    pub fn cancel_all(&mut self) -> RenderLinkResult<()> {
        let before = self.slots.len();
        self.slots.retain(|s| matches!(s, Slot::Running(_)));
        if before != self.slots.len() {
            debug!(dropped = before - self.slots.len(), "queued renders dropped");
        }
        for slot in &self.slots {
            if let Slot::Running(sup) = slot {
                let disposition = sup.request_cancel()?;
                debug!(writer = %sup.task().writer, ?disposition, "cancel requested");
            }
        }
        Ok(())
    }

    /// Wait for every render, launching queued ones as their turn comes.
    ///
    /// Returns one result per submitted task, in submission order. A task whose process fails to
    /// start, or cannot be waited on, gets that error in its slot; the remaining renders are
    /// still launched and waited for.
    pub fn wait_all(self) -> Vec<RenderLinkResult<RenderOutcome>> {
        let Self {
            program,
            config,
            observer,
            slots,
        } = self;

        let mut outcomes = Vec::with_capacity(slots.len());
        for (position, slot) in slots.into_iter().enumerate() {
            let outcome = match slot {
                Slot::Running(sup) => sup.wait(),
                Slot::Queued(task) => {
                    ForegroundProcessSupervisor::spawn(&program, task, &config, observer.clone())
                        .and_then(ForegroundProcessSupervisor::wait)
                }
            };
            if let Err(e) = &outcome {
                warn!(position, "queued render did not complete: {e}");
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    fn launch(&self, task: RenderTask) -> RenderLinkResult<ForegroundProcessSupervisor> {
        ForegroundProcessSupervisor::spawn(&self.program, task, &self.config, self.observer.clone())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/ipc/queue.rs"]
mod tests;
