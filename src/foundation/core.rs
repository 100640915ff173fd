use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::foundation::error::{RenderLinkError, RenderLinkResult};

/// Timeline time at which a parameter is read.
///
/// Times are usually integral frame numbers but may be fractional (motion blur sub-samples).
/// Ordering uses `f64::total_cmp`, so the type can key ordered maps.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct TimeValue(pub f64);

impl TimeValue {
    /// Time of an integral frame.
    pub fn from_frame(frame: i64) -> Self {
        Self(frame as f64)
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeValue {}

impl PartialOrd for TimeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Zero-based dimension of a multi-component parameter (x/y, r/g/b/a, ...).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct DimIdx(pub u32);

/// Zero-based view index (0 is the main view; stereo renders use 0 and 1).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ViewIdx(pub u32);

/// Stable identity of a parameter ("knob") for the duration of a render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct KnobId(pub u64);

/// Upper bound on the number of frames one range may render.
pub const MAX_RANGE_FRAMES: u64 = 10_000_000;

/// Inclusive frame range `[first, last]` rendered every `step` frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawFrameRange")]
pub struct FrameRange {
    /// First frame rendered.
    pub first: i64,
    /// Last frame that may be rendered (inclusive).
    pub last: i64,
    /// Distance between two rendered frames, at least 1.
    pub step: i64,
}

impl FrameRange {
    /// Create a validated range with `first <= last` and `step >= 1`.
    pub fn new(first: i64, last: i64, step: i64) -> RenderLinkResult<Self> {
        if first > last {
            return Err(RenderLinkError::validation(
                "first frame in the sequence is greater than the last frame",
            ));
        }
        if step < 1 {
            return Err(RenderLinkError::validation("frame step must be >= 1"));
        }
        let span = last.checked_sub(first).ok_or_else(|| {
            RenderLinkError::validation(format!("frame range {first}-{last} is too wide"))
        })?;
        let count = (span / step) as u64 + 1;
        if count > MAX_RANGE_FRAMES {
            return Err(RenderLinkError::validation(format!(
                "frame range {first}-{last}:{step} renders {count} frames (max {MAX_RANGE_FRAMES})"
            )));
        }
        Ok(Self { first, last, step })
    }

    /// Number of frames actually rendered.
    pub fn len_frames(self) -> u64 {
        // `new` guarantees the span fits in an i64.
        ((self.last - self.first) / self.step) as u64 + 1
    }

    /// Frames in render order.
    pub fn frames(self) -> impl Iterator<Item = i64> {
        (self.first..=self.last).step_by(self.step as usize)
    }

    /// Return `true` when `frame` is rendered by this range.
    pub fn contains(self, frame: i64) -> bool {
        frame >= self.first && frame <= self.last && (frame - self.first) % self.step == 0
    }
}

#[derive(serde::Deserialize)]
struct RawFrameRange {
    first: i64,
    last: i64,
    step: i64,
}

impl TryFrom<RawFrameRange> for FrameRange {
    type Error = RenderLinkError;

    fn try_from(raw: RawFrameRange) -> Result<Self, Self::Error> {
        Self::new(raw.first, raw.last, raw.step)
    }
}

/// `first-last:step`, the form used on the background command line.
impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}:{}", self.first, self.last, self.step)
    }
}

/// Accepts `F`, `F-L` and `F-L:S`; negative frames are allowed (`-5--1`).
impl FromStr for FrameRange {
    type Err = RenderLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RenderLinkError::validation(format!("invalid frame range '{s}'"));
        let s = s.trim();
        let (span, step) = match s.split_once(':') {
            Some((span, step)) => (span, step.parse::<i64>().map_err(|_| bad())?),
            None => (s, 1),
        };
        // Skip a leading sign when looking for the separator.
        let sep = span
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '-')
            .map(|(i, _)| i);
        let (first, last) = match sep {
            Some(i) => (
                span[..i].parse::<i64>().map_err(|_| bad())?,
                span[i + 1..].parse::<i64>().map_err(|_| bad())?,
            ),
            None => {
                let f = span.parse::<i64>().map_err(|_| bad())?;
                (f, f)
            }
        };
        Self::new(first, last, step)
    }
}
