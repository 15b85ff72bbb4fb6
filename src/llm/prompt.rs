use std::borrow::Cow;
use std::path::Path;

use crate::config::PromptsConfig;
use crate::errors::{PilotError, PilotResult};

/// Instruction sent as the system message when no prompt file is configured.
pub const SYSTEM_PROMPT: &str = r#"You control a computer through its mouse and keyboard.
Each turn you receive the user's goal and a screenshot of the current screen.
Decide the single next step that moves the task forward and answer with ONE JSON object, nothing else:

{
  "status": "in_progress" | "completed" | "failed",
  "description": "what you see and why this step",
  "target": "the UI element you are acting on",
  "action": {
    "type": "move" | "click" | "double_click" | "right_click" | "long_press" | "scroll_up" | "scroll_down" | "drag" | "hotkey" | "wait",
    "coordinates": [x, y],
    "text": ""
  }
}

Rules:
- Coordinates use a 0-1000 grid over the screenshot: [0, 0] is the top-left corner, [1000, 1000] the bottom-right.
- For "drag" give two points: [[x1, y1], [x2, y2]].
- For "hotkey" put the keys in "text" separated by spaces, e.g. "ctrl c" or "win d". Coordinates may be omitted.
- A non-empty "text" on any other action is pasted after the action and submitted with Enter.
- Use "wait" when the screen is still changing.
- Set "status" to "completed" once the goal is visibly achieved and to "failed" when it cannot be achieved.
"#;

/// Resolves the system instruction: the platform-specific file when one is
/// configured, otherwise the built-in text.
pub fn load_system_prompt(cfg: &PromptsConfig) -> PilotResult<String> {
    let file = if cfg!(target_os = "macos") {
        cfg.system_prompt_file_macos.as_ref().or(cfg.system_prompt_file.as_ref())
    } else {
        cfg.system_prompt_file.as_ref()
    };
    match file {
        Some(path) => read_prompt_file(path),
        None => Ok(SYSTEM_PROMPT.to_string()),
    }
}

/// Reads a prompt file as UTF-8, replacing invalid sequences and dropping a BOM.
pub fn read_prompt_file(path: &Path) -> PilotResult<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        PilotError::Config(format!("cannot read system prompt {}: {e}", path.display()))
    })?;
    let text = String::from_utf8_lossy(&bytes);
    if let Cow::Owned(_) = text {
        tracing::warn!(path = %path.display(), "system prompt contained invalid UTF-8; replaced");
    }
    let text = text.trim_start_matches('\u{feff}').to_string();
    if text.trim().is_empty() {
        return Err(PilotError::Config(format!("system prompt {} is empty", path.display())));
    }
    Ok(text)
}
