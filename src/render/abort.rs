use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide cooperative cancellation flag for the renders of one process.
///
/// Renderers poll it between frames; nothing is interrupted forcibly.
#[derive(Clone, Debug, Default)]
pub struct RenderAbort {
    flag: Arc<AtomicBool>,
}

impl RenderAbort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every render sharing this flag to stop at the next frame boundary.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
