use serde::{Deserialize, Serialize};

use crate::perception::types::NormalizedPoint;

/// Progress reported by the model for the current goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
}

impl DecisionStatus {
    /// Anything outside the three known values reads as in-progress.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Move,
    Click,
    DoubleClick,
    RightClick,
    LongPress,
    ScrollUp,
    ScrollDown,
    Drag,
    Hotkey,
    Wait,
}

impl ActionKind {
    /// Tolerant name lookup: case, dashes and spaces are ignored.
    /// Unknown names return `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        let norm: String = name
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        let kind = match norm.as_str() {
            "move" | "mouse_move" | "hover" => Self::Move,
            "click" | "left_click" | "tap" => Self::Click,
            "double_click" | "doubleclick" => Self::DoubleClick,
            "right_click" | "rightclick" => Self::RightClick,
            "long_press" | "longpress" => Self::LongPress,
            "scroll_up" => Self::ScrollUp,
            "scroll_down" => Self::ScrollDown,
            "drag" => Self::Drag,
            "hotkey" => Self::Hotkey,
            "wait" | "" => Self::Wait,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Click => "click",
            Self::DoubleClick => "double_click",
            Self::RightClick => "right_click",
            Self::LongPress => "long_press",
            Self::ScrollUp => "scroll_up",
            Self::ScrollDown => "scroll_down",
            Self::Drag => "drag",
            Self::Hotkey => "hotkey",
            Self::Wait => "wait",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an action lands, in model space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ActionTarget {
    None,
    Point(NormalizedPoint),
    Span {
        start: NormalizedPoint,
        end: NormalizedPoint,
    },
}

impl ActionTarget {
    pub fn point_count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Point(_) => 1,
            Self::Span { .. } => 2,
        }
    }
}

/// Canonical action. A drag always carries a two-point span; every
/// other point-based kind carries exactly one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    kind: ActionKind,
    target: ActionTarget,
    text: String,
}

impl ActionSpec {
    /// Builds an action, reconciling kind and target shape:
    /// a drag with a single point degrades to a move, a non-drag kind
    /// given a span keeps its first point.
    pub fn new(kind: ActionKind, target: ActionTarget, text: impl Into<String>) -> Self {
        let (kind, target) = match (kind, target) {
            (ActionKind::Drag, ActionTarget::Point(p)) => {
                tracing::warn!("drag with a single point; treating as move");
                (ActionKind::Move, ActionTarget::Point(p))
            }
            (ActionKind::Drag, t) => (ActionKind::Drag, t),
            (k, ActionTarget::Span { start, .. }) => (k, ActionTarget::Point(start)),
            (k, t) => (k, t),
        };
        Self {
            kind,
            target,
            text: text.into(),
        }
    }

    /// The harmless default: wait at the origin.
    pub fn wait() -> Self {
        Self::new(
            ActionKind::Wait,
            ActionTarget::Point(NormalizedPoint::new(0.0, 0.0)),
            "",
        )
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn target(&self) -> ActionTarget {
        self.target
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the loop should dispatch this action at all.
    pub fn is_actionable(&self) -> bool {
        match self.kind {
            ActionKind::Wait => false,
            ActionKind::Hotkey => {
                !self.text.trim().is_empty() || self.target.point_count() > 0
            }
            _ => self.target.point_count() > 0,
        }
    }
}

impl Default for ActionSpec {
    fn default() -> Self {
        Self::wait()
    }
}

/// One parsed model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AiDecision {
    pub status: DecisionStatus,
    pub description: String,
    pub target: String,
    pub action: ActionSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Success,
    Failure,
    Cancelled,
    Exhausted,
}

/// Produced once per loop pass; only `Continue` re-enters the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationResult {
    Continue,
    Terminal(TerminalState),
}

/// Final result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub state: TerminalState,
    pub iterations: u32,
    pub summary: String,
}

impl TaskOutcome {
    pub fn new(state: TerminalState, iterations: u32, max_iterations: u32) -> Self {
        let summary = match state {
            TerminalState::Success => "task completed".to_string(),
            TerminalState::Failure => "task failed or too complex".to_string(),
            TerminalState::Cancelled => "interrupted by user".to_string(),
            TerminalState::Exhausted => format!("reached maximum iterations ({max_iterations})"),
        };
        Self {
            state,
            iterations,
            summary,
        }
    }
}

/// Commands accepted by the dedicated engine worker.
#[derive(Debug, Clone)]
pub enum AgentCommand {
    Goal(String),
    Shutdown,
}
