//! Audit copies of each iteration's screenshot with the resolved pointer
//! targets marked on them.
//!
//! Markers are drawn in screenshot pixel space, so a screen point is scaled
//! back down by the capture's downscale factor before it is painted.
use std::path::{Path, PathBuf};

use image::RgbaImage;

use crate::errors::{PilotError, PilotResult};
use crate::executor::coordinator::to_image_space;
use crate::perception::codec::encode_png;
use crate::perception::types::{ScreenPoint, Screenshot};

pub const MARKER_RADIUS: i32 = 10;
const MARKER_COLOUR: [u8; 4] = [255, 0, 0, 255];
const LABEL_PREFIX: &str = "screen_label";

/// Copy of the screenshot with a filled red disc at every point.
pub fn mark_points(shot: &Screenshot, points: &[ScreenPoint]) -> RgbaImage {
    let mut canvas = shot.image.clone();
    for p in points {
        let (cx, cy) = to_image_space(*p, shot.scale);
        draw_disc(&mut canvas, cx, cy, MARKER_RADIUS, MARKER_COLOUR);
    }
    canvas
}

pub fn label_path(dir: &Path, iteration: u32) -> PathBuf {
    dir.join(format!("{LABEL_PREFIX}{iteration}.png"))
}

/// Writes `screen_label{iteration}.png` into `dir`, creating it if needed.
pub fn write_label(dir: &Path, iteration: u32, image: &RgbaImage) -> PilotResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = label_path(dir, iteration);
    std::fs::write(&path, encode_png(image)?)?;
    Ok(path)
}

/// Removes label images left over from an earlier run. A missing directory is fine.
pub fn clear_label_dir(dir: &Path) -> PilotResult<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PilotError::Io(e)),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let is_label = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LABEL_PREFIX) && n.ends_with(".png"));
        if is_label {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "stale label images removed");
    }
    Ok(removed)
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_disc(canvas: &mut RgbaImage, cx: i32, cy: i32, radius: i32, col: [u8; 4]) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && x < iw && y >= 0 && y < ih {
                set_pixel(canvas, x as u32, y as u32, col);
            }
        }
    }
}

fn set_pixel(canvas: &mut RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32, scale: f64) -> Screenshot {
        Screenshot {
            image: RgbaImage::from_pixel(w, h, image::Rgba([0, 0, 0, 255])),
            scale,
        }
    }

    #[test]
    fn marker_lands_at_point_times_scale() {
        let shot = blank(100, 100, 0.5);
        let out = mark_points(&shot, &[ScreenPoint::new(100.0, 60.0)]);
        assert_eq!(out.get_pixel(50, 30).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(50, 30 + MARKER_RADIUS as u32 + 1).0, [0, 0, 0, 255]);
        // source untouched
        assert_eq!(shot.image.get_pixel(50, 30).0, [0, 0, 0, 255]);
    }

    #[test]
    fn markers_near_edges_are_clipped() {
        let shot = blank(20, 20, 1.0);
        let points = [ScreenPoint::new(0.0, 0.0), ScreenPoint::new(5000.0, 5000.0)];
        let out = mark_points(&shot, &points);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(19, 19).0, [0, 0, 0, 255]);
    }

    #[test]
    fn labels_are_written_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("imgs").join("label");
        let img = RgbaImage::new(4, 4);
        let first = write_label(&labels, 1, &img).unwrap();
        write_label(&labels, 2, &img).unwrap();
        std::fs::write(labels.join("keep.txt"), "x").unwrap();

        assert_eq!(first.file_name().unwrap(), "screen_label1.png");
        assert_eq!(clear_label_dir(&labels).unwrap(), 2);
        assert!(labels.join("keep.txt").exists());
        assert!(!first.exists());
    }

    #[test]
    fn clearing_a_missing_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(clear_label_dir(&dir.path().join("absent")).unwrap(), 0);
    }
}
