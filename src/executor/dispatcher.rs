// Decision → primitive input operations.
use std::time::Duration;

use crate::agent_engine::state::{ActionKind, ActionSpec, ActionTarget};
use crate::config::ExecutionConfig;
use crate::errors::PilotResult;
use crate::executor::coordinator::map_point;
use crate::executor::input::InputInjector;
use crate::executor::keymap::KeyMap;
use crate::perception::types::ScreenPoint;

/// Wheel notches per scroll action.
pub const SCROLL_NOTCHES: i32 = 5;
/// Drags travel this many times slower than a plain move.
pub const DRAG_SLOWDOWN: u32 = 10;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub move_duration: Duration,
    /// Pause after the primary gesture before any text is pasted.
    pub settle_delay: Duration,
    pub paste_delay: Duration,
    pub submit_delay: Duration,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            move_duration: Duration::from_millis(cfg.move_duration_ms),
            settle_delay: Duration::from_millis(cfg.settle_delay_ms),
            paste_delay: Duration::from_millis(100),
            submit_delay: Duration::from_millis(500),
        }
    }

    /// No pauses at all.
    pub fn immediate() -> Self {
        Self {
            move_duration: Duration::ZERO,
            settle_delay: Duration::ZERO,
            paste_delay: Duration::ZERO,
            submit_delay: Duration::ZERO,
        }
    }
}

/// What was done and where.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub summary: String,
    pub points: Vec<ScreenPoint>,
}

pub struct ActionExecutor {
    injector: Box<dyn InputInjector>,
    keymap: KeyMap,
    settings: ExecutorSettings,
}

impl ActionExecutor {
    pub fn new(
        injector: Box<dyn InputInjector>,
        keymap: KeyMap,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            injector,
            keymap,
            settings,
        }
    }

    pub fn execute(
        &mut self,
        action: &ActionSpec,
        scale: f64,
        image_width: Option<u32>,
        image_height: Option<u32>,
    ) -> PilotResult<ExecutionReport> {
        let kind = action.kind();
        let mut lines = Vec::new();

        let points = match (kind, action.target()) {
            (ActionKind::Wait, _) => return Ok(ExecutionReport {
                summary: "waited".into(),
                points: Vec::new(),
            }),

            (ActionKind::Hotkey, _) => {
                let keys = self.keymap.split_combo(action.text());
                if keys.is_empty() {
                    tracing::warn!("hotkey requested without keys");
                    return Ok(ExecutionReport {
                        summary: "hotkey without keys; nothing pressed".into(),
                        points: Vec::new(),
                    });
                }
                let combo = keys.join("+");
                tracing::info!(combo = %combo, "pressing hotkey");
                self.injector.key_combo(&keys)?;
                return Ok(ExecutionReport {
                    summary: format!("pressed hotkey {combo}"),
                    points: Vec::new(),
                });
            }

            (ActionKind::Drag, ActionTarget::Span { start, end }) => {
                let start = map_point(start, scale, image_width, image_height);
                let end = map_point(end, scale, image_width, image_height);
                self.injector.move_to(start, self.settings.move_duration)?;
                self.injector
                    .drag_to(end, self.settings.move_duration.saturating_mul(DRAG_SLOWDOWN))?;
                tracing::info!(%start, %end, "drag complete");
                lines.push(format!("dragged {start} -> {end}"));
                vec![start, end]
            }

            (kind, ActionTarget::Point(p)) => {
                let point = map_point(p, scale, image_width, image_height);
                self.injector.move_to(point, self.settings.move_duration)?;
                let (x, y) = point.to_pixels();
                tracing::info!(%kind, x, y, "pointer moved");
                lines.push(format!("moved pointer to {point}"));
                match kind {
                    ActionKind::Click => self.injector.click()?,
                    ActionKind::DoubleClick => self.injector.double_click()?,
                    ActionKind::RightClick => self.injector.right_click()?,
                    ActionKind::LongPress => self.injector.mouse_down()?,
                    ActionKind::ScrollUp => self.injector.scroll(SCROLL_NOTCHES)?,
                    ActionKind::ScrollDown => self.injector.scroll(-SCROLL_NOTCHES)?,
                    _ => {}
                }
                if kind != ActionKind::Move {
                    lines.push(format!("{kind} at {point}"));
                }
                vec![point]
            }

            (kind, _) => {
                tracing::warn!(%kind, "action has no usable target");
                return Ok(ExecutionReport {
                    summary: format!("{kind} skipped: no target"),
                    points: Vec::new(),
                });
            }
        };

        let text = action.text();
        if !text.is_empty() {
            self.paste_and_submit(text)?;
            lines.push(format!("pasted text: {text}"));
        }

        Ok(ExecutionReport {
            summary: lines.join("\n"),
            points,
        })
    }

    /// Clipboard + paste gesture + enter. Independent of the pointer action.
    fn paste_and_submit(&mut self, text: &str) -> PilotResult<()> {
        std::thread::sleep(self.settings.settle_delay);
        self.injector.clipboard_copy(text)?;
        std::thread::sleep(self.settings.paste_delay);
        self.injector.key_combo(&self.keymap.paste_combo())?;
        tracing::info!(text = %text, "text pasted");
        std::thread::sleep(self.settings.submit_delay);
        self.injector.key_combo(&["enter".to_string()])
    }
}
