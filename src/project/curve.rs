use crate::foundation::error::{RenderLinkError, RenderLinkResult};

/// Shaping applied to the segment that starts at a key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ease {
    #[default]
    Linear,
    In,
    Out,
    InOut,
}

impl Ease {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::In => t * t * t,
            Self::Out => 1.0 - (1.0 - t).powi(3),
            Self::InOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(3) / 2.0)
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Constant,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CurveKey {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub ease: Ease, // toward the next key
}

/// Piecewise curve `x -> y` defined by keys sorted on `x`.
///
/// Used both for animation curves (x is time) and for parametric shapes (x is the normalized
/// parameter position). Outside the key range the curve holds the first or last value.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Curve {
    #[serde(default)]
    pub keys: Vec<CurveKey>,
    #[serde(default)]
    pub interpolation: Interpolation,
    /// Value when there are no keys.
    #[serde(default)]
    pub default: Option<f64>,
}

impl Curve {
    pub fn constant(value: f64) -> Self {
        Self {
            keys: Vec::new(),
            interpolation: Interpolation::Constant,
            default: Some(value),
        }
    }

    pub fn from_points(points: &[(f64, f64)]) -> Self {
        Self {
            keys: points
                .iter()
                .map(|&(x, y)| CurveKey {
                    x,
                    y,
                    ease: Ease::Linear,
                })
                .collect(),
            interpolation: Interpolation::Linear,
            default: None,
        }
    }

    pub fn validate(&self) -> RenderLinkResult<()> {
        if self.keys.is_empty() && self.default.is_none() {
            return Err(RenderLinkError::validation(
                "curve must have at least one key or a default value",
            ));
        }
        if self.keys.iter().any(|k| !k.x.is_finite() || !k.y.is_finite()) {
            return Err(RenderLinkError::validation("curve keys must be finite"));
        }
        if !self.keys.windows(2).all(|w| w[0].x <= w[1].x) {
            return Err(RenderLinkError::validation("curve keys must be sorted by x"));
        }
        Ok(())
    }

    pub fn value_at(&self, x: f64) -> RenderLinkResult<f64> {
        if self.keys.is_empty() {
            return self
                .default
                .ok_or_else(|| RenderLinkError::render("curve has no keys and no default"));
        }

        let idx = self.keys.partition_point(|k| k.x <= x);
        if idx == 0 {
            return Ok(self.keys[0].y);
        }
        if idx >= self.keys.len() {
            return Ok(self.keys[self.keys.len() - 1].y);
        }

        let a = &self.keys[idx - 1];
        let b = &self.keys[idx];
        let span = b.x - a.x;
        if span <= 0.0 {
            return Ok(a.y);
        }
        match self.interpolation {
            Interpolation::Constant => Ok(a.y),
            Interpolation::Linear => {
                let t = a.ease.apply((x - a.x) / span);
                Ok(a.y + (b.y - a.y) * t)
            }
        }
    }
}
