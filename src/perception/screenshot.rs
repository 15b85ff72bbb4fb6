// Screen capture of the primary monitor.
use image::imageops::{self, FilterType};
use image::RgbaImage;
use xcap::Monitor;

use crate::config::ScreenshotConfig;
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::Screenshot;

/// Anything that can produce the current screen as an image.
pub trait ScreenCapture {
    fn capture(&mut self) -> PilotResult<Screenshot>;
}

pub struct XcapCapture {
    optimize_for_speed: bool,
    max_edge: u32,
}

impl XcapCapture {
    pub fn new(cfg: &ScreenshotConfig) -> Self {
        Self {
            optimize_for_speed: cfg.optimize_for_speed,
            max_edge: cfg.max_edge,
        }
    }

    fn primary_monitor() -> PilotResult<Monitor> {
        let monitors =
            Monitor::all().map_err(|e| PilotError::Capture(format!("enumerate monitors: {e}")))?;
        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary() {
                return Ok(monitor);
            }
            fallback.get_or_insert(monitor);
        }
        fallback.ok_or_else(|| PilotError::Capture("no monitor found".into()))
    }
}

impl ScreenCapture for XcapCapture {
    fn capture(&mut self) -> PilotResult<Screenshot> {
        let monitor = Self::primary_monitor()?;
        let image = monitor
            .capture_image()
            .map_err(|e| PilotError::Capture(format!("capture: {e}")))?;
        let max_edge = if self.optimize_for_speed { Some(self.max_edge) } else { None };
        let shot = downscale(image, max_edge);
        let (w, h) = shot.dimensions();
        tracing::debug!(width = w, height = h, scale = shot.scale, "screen captured");
        Ok(shot)
    }
}

/// Shrinks `image` so its longest edge is at most `max_edge`, reporting the
/// factor applied. Images already small enough keep scale 1.0.
pub fn downscale(image: RgbaImage, max_edge: Option<u32>) -> Screenshot {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    match max_edge {
        Some(limit) if limit > 0 && longest > limit => {
            let scale = limit as f64 / longest as f64;
            let nw = ((w as f64 * scale).round() as u32).max(1);
            let nh = ((h as f64 * scale).round() as u32).max(1);
            Screenshot {
                image: imageops::resize(&image, nw, nh, FilterType::Triangle),
                scale,
            }
        }
        _ => Screenshot { image, scale: 1.0 },
    }
}
