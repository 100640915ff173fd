use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::{
    cache::context::{cached_parametric_curve, read_cached},
    foundation::core::{DimIdx, FrameRange, KnobId, TimeValue, ViewIdx},
    foundation::error::{RenderLinkError, RenderLinkResult},
    project::curve::Curve,
};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    pub writers: BTreeMap<String, WriterNode>, // keyed by script name
    #[serde(default)]
    pub knobs: Vec<KnobDef>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct WriterNode {
    pub first_frame: i64,
    pub last_frame: i64,
    #[serde(default = "one_i64")]
    pub frame_step: i64,
    /// JSON-lines file receiving one record per rendered (frame, view).
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default = "one_u32")]
    pub views: u32,
    /// Simulated cost of one frame.
    #[serde(default)]
    pub frame_delay_ms: u64,
}

fn one_i64() -> i64 {
    1
}

fn one_u32() -> u32 {
    1
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct KnobDef {
    pub id: KnobId,
    pub name: String,
    #[serde(flatten)]
    pub value: KnobValue,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnobValue {
    Bool {
        value: bool,
    },
    Int {
        value: i32,
    },
    Double {
        curves: Vec<Curve>, // one per dimension
    },
    String {
        value: String,
    },
    Parametric {
        curves: Vec<Curve>, // one per dimension
        #[serde(default = "default_samples")]
        samples: u32,
    },
}

fn default_samples() -> u32 {
    5
}

impl Project {
    pub fn from_json_str(s: &str) -> RenderLinkResult<Self> {
        let project: Self =
            serde_json::from_str(s).map_err(|e| RenderLinkError::serde(e.to_string()))?;
        project.validate()?;
        Ok(project)
    }

    pub fn from_path(path: &Path) -> RenderLinkResult<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read project '{}'", path.display()))?;
        Self::from_json_str(&s)
    }

    pub fn validate(&self) -> RenderLinkResult<()> {
        if self.writers.is_empty() {
            return Err(RenderLinkError::validation("project has no writer nodes"));
        }
        for (name, writer) in &self.writers {
            writer.frame_range().map_err(|e| {
                RenderLinkError::validation(format!("writer '{name}': {e}"))
            })?;
            if writer.views == 0 {
                return Err(RenderLinkError::validation(format!(
                    "writer '{name}' must render at least one view"
                )));
            }
        }

        let mut seen = HashSet::new();
        for knob in &self.knobs {
            if !seen.insert(knob.id) {
                return Err(RenderLinkError::validation(format!(
                    "duplicate knob id {} ('{}')",
                    knob.id.0, knob.name
                )));
            }
            knob.validate()?;
        }
        Ok(())
    }

    /// Make relative writer outputs relative to `base` (usually the project file's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        for writer in self.writers.values_mut() {
            if let Some(out) = writer.output.as_mut()
                && out.is_relative()
            {
                *out = base.join(&*out);
            }
        }
    }

    pub fn writer(&self, name: &str) -> RenderLinkResult<&WriterNode> {
        self.writers.get(name).ok_or_else(|| {
            RenderLinkError::validation(format!("project has no writer named '{name}'"))
        })
    }
}

impl WriterNode {
    pub fn frame_range(&self) -> RenderLinkResult<FrameRange> {
        FrameRange::new(self.first_frame, self.last_frame, self.frame_step)
    }
}

impl KnobDef {
    pub fn validate(&self) -> RenderLinkResult<()> {
        match &self.value {
            KnobValue::Bool { .. } | KnobValue::Int { .. } | KnobValue::String { .. } => Ok(()),
            KnobValue::Double { curves } => self.validate_curves(curves),
            KnobValue::Parametric { curves, samples } => {
                if *samples < 2 {
                    return Err(RenderLinkError::validation(format!(
                        "parametric knob '{}' needs at least 2 samples",
                        self.name
                    )));
                }
                self.validate_curves(curves)
            }
        }
    }

    fn validate_curves(&self, curves: &[Curve]) -> RenderLinkResult<()> {
        if curves.is_empty() {
            return Err(RenderLinkError::validation(format!(
                "knob '{}' has no dimensions",
                self.name
            )));
        }
        for curve in curves {
            curve
                .validate()
                .map_err(|e| RenderLinkError::validation(format!("knob '{}': {e}", self.name)))?;
        }
        Ok(())
    }

    /// Read the knob at `time` for `view` through the current render scope's cache.
    ///
    /// Multi-dimensional knobs yield arrays; parametric knobs yield one array of evenly spaced
    /// samples over `[0, 1]` per dimension.
    pub fn read(&self, time: TimeValue, view: ViewIdx) -> RenderLinkResult<serde_json::Value> {
        let id = self.id;
        let d0 = DimIdx(0);
        Ok(match &self.value {
            KnobValue::Bool { value } => read_cached(id, time, d0, view, || Ok(*value))?.into(),
            KnobValue::Int { value } => read_cached(id, time, d0, view, || Ok(*value))?.into(),
            KnobValue::String { value } => {
                read_cached(id, time, d0, view, || Ok(value.clone()))?.into()
            }
            KnobValue::Double { curves } => {
                let mut dims = Vec::with_capacity(curves.len());
                for (d, curve) in (0u32..).zip(curves) {
                    dims.push(read_cached(id, time, DimIdx(d), view, || curve.value_at(time.0))?);
                }
                dims.into()
            }
            KnobValue::Parametric { curves, samples } => {
                let mut dims = Vec::with_capacity(curves.len());
                for (d, source) in (0u32..).zip(curves) {
                    let curve = cached_parametric_curve(id, DimIdx(d), source);
                    let last = f64::from(samples.saturating_sub(1).max(1));
                    let mut points = Vec::with_capacity(*samples as usize);
                    for i in 0..*samples {
                        points.push(curve.value_at(f64::from(i) / last)?);
                    }
                    dims.push(serde_json::Value::from(points));
                }
                dims.into()
            }
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/project/model.rs"]
mod tests;
