use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Either a base URL or the full chat-completions endpoint.
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional API key stored in config.toml (env var SCREENPILOT_<ID>_API_KEY wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Pause after a failed capture or encode before the next pass.
    #[serde(default = "default_capture_cooldown_ms")]
    pub capture_cooldown_ms: u64,
    /// Pause after a failed model call.
    #[serde(default = "default_model_backoff_ms")]
    pub model_backoff_ms: u64,
    /// Pause when the model returned nothing actionable.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    /// Pointer travel time for a plain move; drags take ten times as long.
    #[serde(default = "default_move_duration_ms")]
    pub move_duration_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Upper bound on `move_duration_ms`; drags multiply it further.
pub const MAX_MOVE_DURATION_MS: u64 = 10_000;

fn default_max_iterations() -> u32 {
    20
}

fn default_capture_cooldown_ms() -> u64 {
    500
}

fn default_model_backoff_ms() -> u64 {
    2000
}

fn default_idle_delay_ms() -> u64 {
    1000
}

fn default_move_duration_ms() -> u64 {
    100
}

fn default_settle_delay_ms() -> u64 {
    200
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            capture_cooldown_ms: default_capture_cooldown_ms(),
            model_backoff_ms: default_model_backoff_ms(),
            idle_delay_ms: default_idle_delay_ms(),
            move_duration_ms: default_move_duration_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_true")]
    pub optimize_for_speed: bool,
    /// Longest edge in pixels before the screenshot is downscaled.
    #[serde(default = "default_max_edge")]
    pub max_edge: u32,
    #[serde(default = "default_label_dir")]
    pub label_dir: PathBuf,
    #[serde(default = "default_true")]
    pub annotate: bool,
}

fn default_max_edge() -> u32 {
    1280
}

fn default_label_dir() -> PathBuf {
    PathBuf::from("imgs").join("label")
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            optimize_for_speed: true,
            max_edge: default_max_edge(),
            label_dir: default_label_dir(),
            annotate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
    /// Used instead of `system_prompt_file` when running on macOS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file_macos: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub transcript: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { transcript: true }
    }
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Checks the settings a task cannot start without.
    pub fn validate(&self) -> PilotResult<()> {
        if self.llm.providers.is_empty() {
            return Err(PilotError::Config("no [llm.providers] configured".into()));
        }
        if !self.llm.providers.contains_key(&self.llm.active_provider) {
            return Err(PilotError::Config(format!(
                "active provider '{}' is not defined under [llm.providers]",
                self.llm.active_provider
            )));
        }
        if self.execution.max_iterations == 0 {
            return Err(PilotError::Config("execution.max_iterations must be > 0".into()));
        }
        if self.screenshot.max_edge == 0 {
            return Err(PilotError::Config("screenshot.max_edge must be > 0".into()));
        }
        if self.execution.move_duration_ms > MAX_MOVE_DURATION_MS {
            return Err(PilotError::Config(format!(
                "execution.move_duration_ms must be at most {MAX_MOVE_DURATION_MS}"
            )));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> PilotResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(PilotError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config(explicit: Option<&Path>) -> PilotResult<(AppConfig, PathBuf)> {
    let path = resolve_config_path(explicit)?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok((config, path))
}

pub fn save_config(config: &AppConfig, path: &Path) -> PilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
