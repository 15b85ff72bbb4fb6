use serde::{Deserialize, Serialize};

/// Bound applied to any model-reported coordinate before mapping.
pub const MODEL_COORD_LIMIT: f64 = 100_000.0;
/// Upper bound of a resolved screen coordinate.
pub const SCREEN_COORD_LIMIT: f64 = 100_000.0;

/// A point as reported by the model: either screenshot pixels or
/// 0–1000 normalized space, depending on whether image dimensions are
/// known when it is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_finite(x, -MODEL_COORD_LIMIT, MODEL_COORD_LIMIT),
            y: clamp_finite(y, -MODEL_COORD_LIMIT, MODEL_COORD_LIMIT),
        }
    }
}

/// Absolute screen pixel coordinates, always inside `[0, 100000]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_finite(x, 0.0, SCREEN_COORD_LIMIT),
            y: clamp_finite(y, 0.0, SCREEN_COORD_LIMIT),
        }
    }

    /// Rounded integer pixels for the input backend.
    pub fn to_pixels(self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

impl std::fmt::Display for ScreenPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.0}, {:.0})", self.x, self.y)
    }
}

/// NaN and infinities collapse to the lower bound (or 0 when it is inside the range).
pub(crate) fn clamp_finite(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        return 0.0_f64.clamp(lo, hi);
    }
    v.clamp(lo, hi)
}

/// A captured frame plus the downscale factor applied to it.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub image: image::RgbaImage,
    /// `<= 1.0`; model-space pixels divided by this give true screen pixels.
    pub scale: f64,
}

impl Screenshot {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
