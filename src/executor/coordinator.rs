// Model-space → physical screen coordinate mapping.
use crate::perception::types::{NormalizedPoint, ScreenPoint};

/// Size of the resolution-independent space the vision model reports in.
pub const NORMALIZED_SPACE: f64 = 1000.0;

/// Maps a model-reported point to true screen pixels.
///
/// With both image dimensions the point is read as 0–1000 normalized
/// space and scaled to the screenshot size; without them it is already
/// in screenshot pixels. The result is divided by `scale` to undo the
/// downscale applied before transmission, then clamped to the screen range.
pub fn map_point(
    point: NormalizedPoint,
    scale: f64,
    image_width: Option<u32>,
    image_height: Option<u32>,
) -> ScreenPoint {
    let point = NormalizedPoint::new(point.x, point.y);

    let (x_abs, y_abs) = match (image_width, image_height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (
            point.x / NORMALIZED_SPACE * w as f64,
            point.y / NORMALIZED_SPACE * h as f64,
        ),
        _ => (point.x, point.y),
    };

    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    ScreenPoint::new(x_abs / scale, y_abs / scale)
}

/// Inverse of the downscale only: a resolved screen point back into screenshot pixels.
pub fn to_image_space(point: ScreenPoint, scale: f64) -> (i32, i32) {
    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    ((point.x * scale) as i32, (point.y * scale) as i32)
}
