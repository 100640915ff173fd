//! Per-frame progress of a sequence render.

use std::io::Write as _;
use std::time::{Duration, Instant};

use crate::ipc::background::BackgroundProcessAgent;
use crate::ipc::message::ControlMessage;

/// Counts rendered frames of one writer and derives speed and time estimates.
#[derive(Debug)]
pub struct ProgressTracker {
    writer: String,
    total: u64,
    rendered: u64,
    started: Instant,
}

/// Snapshot taken right after a frame was rendered.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameProgress {
    pub writer: String,
    pub frame: i64,
    pub rendered: u64,
    pub total: u64,
    pub fps: f64,
    pub remaining: Duration,
}

impl ProgressTracker {
    pub fn new(writer: impl Into<String>, total: u64) -> Self {
        Self {
            writer: writer.into(),
            total,
            rendered: 0,
            started: Instant::now(),
        }
    }

    pub fn record_frame(&mut self, frame: i64) -> FrameProgress {
        self.rendered = (self.rendered + 1).min(self.total.max(1));
        let elapsed = self.started.elapsed();
        self.snapshot(frame, elapsed)
    }

    fn snapshot(&self, frame: i64, elapsed: Duration) -> FrameProgress {
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 {
            self.rendered as f64 / secs
        } else {
            0.0
        };
        let left = self.total.saturating_sub(self.rendered);
        let remaining = if self.rendered == 0 {
            Duration::ZERO
        } else {
            elapsed.mul_f64(left as f64 / self.rendered as f64)
        };
        FrameProgress {
            writer: self.writer.clone(),
            frame,
            rendered: self.rendered,
            total: self.total,
            fps,
            remaining,
        }
    }
}

impl FrameProgress {
    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.rendered as f64 / self.total as f64
        }
    }

    pub fn percent(&self) -> u8 {
        (self.fraction() * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Human-readable line, e.g. `Write1 ==> Frame: 3, Progress: 30.0%, 12.5 Fps, Time Remaining: 1s`.
    pub fn long_message(&self) -> String {
        format!(
            "{} ==> Frame: {}, Progress: {:.1}%, {:.1} Fps, Time Remaining: {}",
            self.writer,
            self.frame,
            self.fraction() * 100.0,
            self.fps,
            format_remaining(self.remaining)
        )
    }

    /// Messages sent to the supervisor for this frame.
    pub fn short_messages(&self) -> [ControlMessage; 2] {
        [
            ControlMessage::FrameRendered(self.frame),
            ControlMessage::Progress(self.percent()),
        ]
    }
}

pub fn format_remaining(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Forward `short` to the supervisor. Returns `false` when there is no output channel or a
/// write failed.
pub fn write_to_output_pipe(agent: Option<&BackgroundProcessAgent>, short: &[ControlMessage]) -> bool {
    let Some(agent) = agent.filter(|a| a.has_output_channel()) else {
        return false;
    };
    short.iter().all(|msg| agent.write_to_output_channel(msg))
}

/// Report one rendered frame on stdout and on the output channel.
pub fn report_frame(agent: Option<&BackgroundProcessAgent>, progress: &FrameProgress) {
    print_line(&progress.long_message());
    write_to_output_pipe(agent, &progress.short_messages());
}

fn print_line(line: &str) {
    let mut out = std::io::stdout().lock();
    // stdout may be closed by the parent; progress is best effort.
    let _ = writeln!(out, "{line}").and_then(|()| out.flush());
}
