use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;

/// Engine that notifies from another thread after a delay.
struct DelayedEngine {
    delay: Duration,
    starts: AtomicUsize,
    handle: Mutex<Option<CompletionHandle>>,
}

impl DelayedEngine {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            starts: AtomicUsize::new(0),
            handle: Mutex::new(None),
        }
    }
}

impl RenderEngine for DelayedEngine {
    fn render_full_sequence(&self, done: CompletionHandle) -> RenderLinkResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.handle.lock().unwrap() = Some(done.clone());
        let delay = self.delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            assert!(done.notify_render_finished());
        });
        Ok(())
    }
}

/// Engine that never signals completion.
struct SilentEngine;

impl RenderEngine for SilentEngine {
    fn render_full_sequence(&self, _done: CompletionHandle) -> RenderLinkResult<()> {
        Ok(())
    }
}

struct FailingEngine;

impl RenderEngine for FailingEngine {
    fn render_full_sequence(&self, _done: CompletionHandle) -> RenderLinkResult<()> {
        Err(RenderLinkError::render("engine unavailable"))
    }
}

fn threaded() -> RenderConfig {
    RenderConfig {
        thread_count: 2,
        ..RenderConfig::default()
    }
}

#[test]
fn blocks_until_the_engine_notifies() {
    let coordinator = BlockingRenderCoordinator::new(threaded());
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    let engine = DelayedEngine::new(Duration::from_millis(50));
    coordinator.render_full_sequence_blocking(&engine).unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Done);
    assert_eq!(engine.starts.load(Ordering::SeqCst), 1);

    // A second notification is a no-op.
    let handle = engine.handle.lock().unwrap().take().unwrap();
    assert!(!handle.notify_render_finished());
    assert_eq!(coordinator.state(), CoordinatorState::Done);
}

#[test]
fn immediate_notification_is_not_lost() {
    let coordinator = BlockingRenderCoordinator::new(threaded());
    coordinator
        .render_full_sequence_blocking(&DelayedEngine::new(Duration::ZERO))
        .unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Done);
}

#[test]
fn notify_without_waiter_does_nothing() {
    let coordinator = BlockingRenderCoordinator::new(threaded());
    assert!(!coordinator.completion_handle().notify_render_finished());
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[test]
fn inline_mode_returns_without_waiting() {
    let coordinator = BlockingRenderCoordinator::new(RenderConfig {
        thread_count: -1,
        ..RenderConfig::default()
    });
    coordinator.render_full_sequence_blocking(&SilentEngine).unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Done);
}

#[test]
fn engine_start_failure_is_returned() {
    let coordinator = BlockingRenderCoordinator::new(threaded());
    let err = coordinator
        .render_full_sequence_blocking(&FailingEngine)
        .unwrap_err();
    assert!(err.to_string().contains("engine unavailable"));
    assert_eq!(coordinator.state(), CoordinatorState::Done);
}

fn small_project() -> Arc<Project> {
    let json = r#"{
        "writers": { "Write1": { "first_frame": 1, "last_frame": 6 } },
        "knobs": [ { "id": 1, "name": "on", "type": "bool", "value": true } ]
    }"#;
    Arc::new(Project::from_json_str(json).unwrap())
}

#[test]
fn sequence_engine_renders_on_its_own_thread() {
    let cfg = threaded();
    let coordinator = BlockingRenderCoordinator::new(cfg.clone());
    let engine = SequenceEngine::new(small_project(), "Write1", cfg, RenderAbort::new())
        .with_frames(FrameRange::new(2, 4, 1).unwrap());
    coordinator.render_full_sequence_blocking(&engine).unwrap();
    let stats = engine.take_result().unwrap().unwrap();
    assert_eq!(stats.frames_rendered, 3);
    assert!(!stats.aborted);
    assert!(engine.take_result().is_none());
}

#[test]
fn sequence_engine_inline_and_unknown_writer() {
    let cfg = RenderConfig {
        thread_count: -1,
        ..RenderConfig::default()
    };
    let coordinator = BlockingRenderCoordinator::new(cfg.clone());
    let engine = SequenceEngine::new(small_project(), "Missing", cfg, RenderAbort::new());
    coordinator.render_full_sequence_blocking(&engine).unwrap();
    assert!(engine.take_result().unwrap().is_err());
}

/// Engine that wakes the coordinator's condvar without finishing, then finishes.
#[derive(Default)]
struct SpuriousWakeEngine {
    wakes_while_waiting: Arc<AtomicUsize>,
    finished: Arc<std::sync::atomic::AtomicBool>,
}

impl RenderEngine for SpuriousWakeEngine {
    fn render_full_sequence(&self, done: CompletionHandle) -> RenderLinkResult<()> {
        let wakes = self.wakes_while_waiting.clone();
        let finished = self.finished.clone();
        std::thread::spawn(move || {
            for _ in 0..5 {
                std::thread::sleep(Duration::from_millis(10));
                if *done.shared.lock() == CoordinatorState::Waiting {
                    wakes.fetch_add(1, Ordering::SeqCst);
                }
                done.shared.cv.notify_all();
            }
            std::thread::sleep(Duration::from_millis(20));
            finished.store(true, Ordering::SeqCst);
            done.notify_render_finished();
        });
        Ok(())
    }
}

#[test]
fn spurious_wakeups_keep_the_caller_blocked() {
    let coordinator = BlockingRenderCoordinator::new(threaded());
    let engine = SpuriousWakeEngine::default();
    coordinator.render_full_sequence_blocking(&engine).unwrap();
    assert!(engine.finished.load(Ordering::SeqCst));
    assert_eq!(engine.wakes_while_waiting.load(Ordering::SeqCst), 5);
    assert_eq!(coordinator.state(), CoordinatorState::Done);
}
