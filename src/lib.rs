#![forbid(unsafe_code)]
//! Background render orchestration.
//!
//! `renderlink` drives renders in a separate OS process over a line-based control link made of
//! two Unix domain socket channels, and memoizes parameter reads within one render evaluation.
//!
//! - [`ForegroundProcessSupervisor`] spawns the render process, relays its progress and delivers
//!   cancellation.
//! - [`BackgroundProcessAgent`] is the child half of the link.
//! - [`RenderValuesCache`] guarantees consistent knob values during one render scope.
//! - [`BlockingRenderCoordinator`] turns an asynchronous full-sequence render into a blocking
//!   call.

pub mod cache;
pub mod foundation;
pub mod ipc;
pub mod project;
pub mod render;

pub use cache::context::{RenderScope, read_cached, with_values_cache};
pub use cache::values::{CacheKey, CacheStats, CachedValue, RenderValuesCache};
pub use foundation::config::RenderConfig;
pub use foundation::core::{DimIdx, FrameRange, KnobId, TimeValue, ViewIdx};
pub use foundation::error::{ProtocolError, RenderLinkError, RenderLinkResult};
pub use ipc::background::BackgroundProcessAgent;
pub use ipc::endpoint::{EndpointAddress, EndpointListener, LineEvent, ProcessEndpoint};
pub use ipc::foreground::{
    CancelDisposition, CancelHandle, ExitKind, ForegroundProcessSupervisor, NoopObserver,
    RenderObserver, RenderOutcome, RenderTask, SupervisorState,
};
pub use ipc::message::{ChannelDirection, ControlMessage};
pub use ipc::queue::RenderQueue;
pub use project::curve::Curve;
pub use project::model::{KnobDef, KnobValue, Project, WriterNode};
pub use render::abort::RenderAbort;
pub use render::blocking::{
    BlockingRenderCoordinator, CompletionHandle, CoordinatorState, RenderEngine, SequenceEngine,
};
pub use render::sequence::{FrameRecord, SequenceRenderer, SequenceStats};
