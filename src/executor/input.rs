// Physical input simulation: enigo for pointer/keyboard, arboard for the clipboard.
use std::time::Duration;

use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::ScreenPoint;

/// Primitive input operations. Every call blocks for the duration of the gesture.
pub trait InputInjector {
    fn move_to(&mut self, point: ScreenPoint, duration: Duration) -> PilotResult<()>;
    fn click(&mut self) -> PilotResult<()>;
    fn double_click(&mut self) -> PilotResult<()>;
    fn right_click(&mut self) -> PilotResult<()>;
    /// Presses the left button without releasing it.
    fn mouse_down(&mut self) -> PilotResult<()>;
    /// Positive scrolls up, negative scrolls down, in wheel notches.
    fn scroll(&mut self, notches: i32) -> PilotResult<()>;
    /// Press at the current position, travel to `point`, release.
    fn drag_to(&mut self, point: ScreenPoint, duration: Duration) -> PilotResult<()>;
    /// Presses `keys` in order and releases them in reverse.
    fn key_combo(&mut self, keys: &[String]) -> PilotResult<()>;
    fn clipboard_copy(&mut self, text: &str) -> PilotResult<()>;
}

const MOVE_STEP: Duration = Duration::from_millis(10);
const KEY_GAP: Duration = Duration::from_millis(30);

pub struct EnigoInjector {
    enigo: Enigo,
    // Kept alive: on X11 the clipboard owner must outlive the paste.
    clipboard: Option<arboard::Clipboard>,
}

impl EnigoInjector {
    pub fn new() -> PilotResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| PilotError::Config(format!("input backend unavailable: {e}")))?;
        Ok(Self {
            enigo,
            clipboard: None,
        })
    }

    fn button(&mut self, button: Button, direction: Direction) -> PilotResult<()> {
        self.enigo
            .button(button, direction)
            .map_err(|e| PilotError::Action(format!("{button:?} {direction:?}: {e}")))
    }

    /// Linear pointer travel so the target application sees intermediate positions.
    fn glide(&mut self, point: ScreenPoint, duration: Duration) -> PilotResult<()> {
        let (tx, ty) = point.to_pixels();
        let steps = step_count(duration);
        let (sx, sy) = self.enigo.location().unwrap_or((tx, ty));
        for i in 1..=steps {
            let x = interpolate(sx, tx, i, steps);
            let y = interpolate(sy, ty, i, steps);
            self.enigo
                .move_mouse(x, y, Coordinate::Abs)
                .map_err(|e| PilotError::Action(format!("move to ({x}, {y}): {e}")))?;
            if i < steps {
                std::thread::sleep(MOVE_STEP);
            }
        }
        Ok(())
    }
}

/// Number of `MOVE_STEP` hops a glide of `duration` takes; at least one.
fn step_count(duration: Duration) -> u32 {
    let steps = duration.as_millis() / MOVE_STEP.as_millis();
    u32::try_from(steps).unwrap_or(u32::MAX).max(1)
}

/// Position after `step` of `steps` on the line from `from` to `to`.
fn interpolate(from: i32, to: i32, step: u32, steps: u32) -> i32 {
    let delta = (i128::from(to) - i128::from(from)) * i128::from(step) / i128::from(steps);
    (i128::from(from) + delta) as i32
}

impl InputInjector for EnigoInjector {
    fn move_to(&mut self, point: ScreenPoint, duration: Duration) -> PilotResult<()> {
        self.glide(point, duration)
    }

    fn click(&mut self) -> PilotResult<()> {
        self.button(Button::Left, Direction::Click)
    }

    fn double_click(&mut self) -> PilotResult<()> {
        self.button(Button::Left, Direction::Click)?;
        std::thread::sleep(Duration::from_millis(50));
        self.button(Button::Left, Direction::Click)
    }

    fn right_click(&mut self) -> PilotResult<()> {
        self.button(Button::Right, Direction::Click)
    }

    fn mouse_down(&mut self) -> PilotResult<()> {
        self.button(Button::Left, Direction::Press)
    }

    fn scroll(&mut self, notches: i32) -> PilotResult<()> {
        // enigo scrolls down for positive lengths.
        self.enigo
            .scroll(-notches, Axis::Vertical)
            .map_err(|e| PilotError::Action(format!("scroll {notches}: {e}")))
    }

    fn drag_to(&mut self, point: ScreenPoint, duration: Duration) -> PilotResult<()> {
        self.button(Button::Left, Direction::Press)?;
        let moved = self.glide(point, duration);
        let released = self.button(Button::Left, Direction::Release);
        moved.and(released)
    }

    fn key_combo(&mut self, keys: &[String]) -> PilotResult<()> {
        let parsed = keys
            .iter()
            .map(|k| parse_key(k).ok_or_else(|| PilotError::Action(format!("unknown key '{k}'"))))
            .collect::<PilotResult<Vec<Key>>>()?;

        if let [single] = parsed.as_slice() {
            return self
                .enigo
                .key(*single, Direction::Click)
                .map_err(|e| PilotError::Action(format!("key {single:?}: {e}")));
        }

        let mut pressed = Vec::with_capacity(parsed.len());
        let mut result = Ok(());
        for key in &parsed {
            if let Err(e) = self.enigo.key(*key, Direction::Press) {
                result = Err(PilotError::Action(format!("press {key:?}: {e}")));
                break;
            }
            pressed.push(*key);
            std::thread::sleep(KEY_GAP);
        }
        // Release whatever went down, even after a failure.
        for key in pressed.iter().rev() {
            if let Err(e) = self.enigo.key(*key, Direction::Release) {
                tracing::warn!(?key, error = %e, "key release failed");
            }
        }
        result
    }

    fn clipboard_copy(&mut self, text: &str) -> PilotResult<()> {
        if self.clipboard.is_none() {
            let cb = arboard::Clipboard::new()
                .map_err(|e| PilotError::Action(format!("clipboard unavailable: {e}")))?;
            self.clipboard = Some(cb);
        }
        match self.clipboard.as_mut() {
            Some(cb) => cb
                .set_text(text.to_string())
                .map_err(|e| PilotError::Action(format!("clipboard write: {e}"))),
            None => Err(PilotError::Action("clipboard unavailable".into())),
        }
    }
}

/// Host key name → enigo key.
pub fn parse_key(name: &str) -> Option<Key> {
    let name = name.trim().to_lowercase();
    let key = match name.as_str() {
        "command" | "cmd" | "win" | "windows" | "meta" | "super" => Key::Meta,
        "ctrl" | "control" => Key::Control,
        "alt" | "option" => Key::Alt,
        "shift" => Key::Shift,
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "page_up" | "pgup" => Key::PageUp,
        "pagedown" | "page_down" | "pgdn" => Key::PageDown,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return None,
            }
        }
    };
    Some(key)
}
