//! In-process rendering of one writer's frame range.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::time::Duration;

use anyhow::Context as _;
use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::{
    cache::context::RenderScope,
    foundation::config::RenderConfig,
    foundation::core::{FrameRange, TimeValue, ViewIdx},
    foundation::error::{RenderLinkError, RenderLinkResult},
    ipc::background::BackgroundProcessAgent,
    ipc::message::ControlMessage,
    project::model::{Project, WriterNode},
    render::abort::RenderAbort,
    render::progress::{ProgressTracker, report_frame},
};

/// One evaluated (frame, view), written as a JSON line to the writer's output.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameRecord {
    pub writer: String,
    pub frame: i64,
    pub view: u32,
    pub knobs: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceStats {
    pub frames_total: u64,
    pub frames_rendered: u64,
    /// The abort flag stopped the render before the last frame.
    pub aborted: bool,
}

/// Renders the frames of one writer node.
pub struct SequenceRenderer<'a> {
    project: &'a Project,
    writer_name: String,
    writer: &'a WriterNode,
    range: FrameRange,
    config: &'a RenderConfig,
    abort: RenderAbort,
    agent: Option<&'a BackgroundProcessAgent>,
}

impl<'a> SequenceRenderer<'a> {
    pub fn new(
        project: &'a Project,
        writer_name: &str,
        config: &'a RenderConfig,
        abort: RenderAbort,
    ) -> RenderLinkResult<Self> {
        let writer = project.writer(writer_name)?;
        Ok(Self {
            project,
            writer_name: writer_name.to_string(),
            writer,
            range: writer.frame_range()?,
            config,
            abort,
            agent: None,
        })
    }

    /// Override the writer's own frame range.
    pub fn with_frames(mut self, range: FrameRange) -> Self {
        self.range = range;
        self
    }

    /// Report progress to the supervisor through `agent`.
    pub fn with_agent(mut self, agent: &'a BackgroundProcessAgent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn range(&self) -> FrameRange {
        self.range
    }

    /// Evaluate every view of one frame, each inside its own render scope.
    pub fn render_frame(&self, frame: i64) -> RenderLinkResult<Vec<FrameRecord>> {
        let time = TimeValue::from_frame(frame);
        let mut records = Vec::with_capacity(self.writer.views as usize);
        for view in 0..self.writer.views {
            let scope = RenderScope::enter();
            let mut knobs = BTreeMap::new();
            for knob in &self.project.knobs {
                knobs.insert(knob.name.clone(), knob.read(time, ViewIdx(view))?);
            }
            if self.writer.frame_delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.writer.frame_delay_ms));
            }
            let cache = scope.finish();
            trace!(frame, view, cached = cache.len(), "frame evaluated");
            records.push(FrameRecord {
                writer: self.writer_name.clone(),
                frame,
                view,
                knobs,
            });
        }
        Ok(records)
    }

    /// Render the whole range, reporting frames in order.
    ///
    /// The abort flag is checked before each frame; an aborted render returns `Ok` with
    /// `aborted` set and keeps the frames already written.
    #[tracing::instrument(skip(self), fields(writer = %self.writer_name))]
    pub fn render(&self) -> RenderLinkResult<SequenceStats> {
        let mut stats = SequenceStats {
            frames_total: self.range.len_frames(),
            ..SequenceStats::default()
        };
        let mut sink = self.open_output()?;
        let mut tracker = ProgressTracker::new(&self.writer_name, stats.frames_total);
        let pool = if self.config.renders_inline() {
            None
        } else {
            Some(build_thread_pool(self.config.worker_threads())?)
        };

        self.notify(&ControlMessage::RenderingStarted);
        info!(
            first = self.range.first,
            last = self.range.last,
            step = self.range.step,
            "sequence render started"
        );

        let chunk_size = normalized_chunk_size(self.config.chunk_size);
        let mut frames = self.range.frames();
        let mut chunk = Vec::with_capacity(chunk_size);
        loop {
            chunk.clear();
            chunk.extend(frames.by_ref().take(chunk_size));
            if chunk.is_empty() {
                break;
            }
            let rendered = match &pool {
                Some(pool) => self.render_chunk_parallel(pool, &chunk),
                None => self.render_chunk_sequential(&chunk),
            };
            for item in rendered {
                let Some(records) = item? else {
                    stats.aborted = true;
                    break;
                };
                let frame = records.first().map(|r| r.frame).unwrap_or_default();
                if let Some(out) = sink.as_mut() {
                    write_records(out, &records)?;
                }
                stats.frames_rendered += 1;
                report_frame(self.agent, &tracker.record_frame(frame));
            }
            if stats.aborted {
                break;
            }
        }

        if let Some(out) = sink.as_mut() {
            out.flush()
                .map_err(|e| RenderLinkError::render(format!("failed to flush output: {e}")))?;
        }
        if stats.aborted {
            info!(rendered = stats.frames_rendered, "sequence render aborted");
        } else {
            self.notify(&ControlMessage::RenderingFinished);
            info!(rendered = stats.frames_rendered, "sequence render finished");
        }
        Ok(stats)
    }

    fn render_chunk_sequential(&self, chunk: &[i64]) -> Vec<RenderLinkResult<Option<Vec<FrameRecord>>>> {
        let mut out = Vec::with_capacity(chunk.len());
        for &frame in chunk {
            if self.abort.is_requested() {
                out.push(Ok(None));
                break;
            }
            out.push(self.render_frame(frame).map(Some));
        }
        out
    }

    fn render_chunk_parallel(
        &self,
        pool: &rayon::ThreadPool,
        chunk: &[i64],
    ) -> Vec<RenderLinkResult<Option<Vec<FrameRecord>>>> {
        pool.install(|| {
            chunk
                .par_iter()
                .map(|&frame| {
                    if self.abort.is_requested() {
                        return Ok(None);
                    }
                    self.render_frame(frame).map(Some)
                })
                .collect()
        })
    }

    fn open_output(&self) -> RenderLinkResult<Option<BufWriter<File>>> {
        let Some(path) = &self.writer.output else {
            return Ok(None);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir '{}'", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("create output '{}'", path.display()))?;
        debug!(path = %path.display(), "writing frame records");
        Ok(Some(BufWriter::new(file)))
    }

    fn notify(&self, msg: &ControlMessage) {
        if let Some(agent) = self.agent {
            agent.write_to_output_channel(msg);
        }
    }
}

fn write_records(out: &mut BufWriter<File>, records: &[FrameRecord]) -> RenderLinkResult<()> {
    for record in records {
        serde_json::to_writer(&mut *out, record).map_err(|e| RenderLinkError::serde(e.to_string()))?;
        out.write_all(b"\n")
            .map_err(|e| RenderLinkError::render(format!("failed to write output: {e}")))?;
    }
    Ok(())
}

fn build_thread_pool(threads: Option<usize>) -> RenderLinkResult<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("renderlink-worker-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| RenderLinkError::render(format!("failed to build rayon thread pool: {e}")))
}

fn normalized_chunk_size(chunk_size: usize) -> usize {
    chunk_size.max(1)
}

#[cfg(test)]
#[path = "../../tests/unit/render/sequence.rs"]
mod tests;
