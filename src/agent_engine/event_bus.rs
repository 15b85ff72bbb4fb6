use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent_engine::state::{ActionKind, DecisionStatus, TaskOutcome};
use crate::perception::types::ScreenPoint;

/// Which step of an iteration hit a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Capture,
    Encode,
    ModelCall,
    Action,
    Annotate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    IterationStarted {
        iteration: u32,
    },
    DecisionParsed {
        status: DecisionStatus,
        kind: ActionKind,
        description: String,
    },
    CoordinateResolved {
        point: ScreenPoint,
    },
    RecoverableFailure {
        stage: FailureStage,
        detail: String,
    },
    TaskFinished {
        outcome: TaskOutcome,
    },
}

/// Receives engine progress. Called on the engine worker, so it must return quickly.
pub trait LoopObserver: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Observer that drops everything.
pub struct NoopObserver;

impl LoopObserver for NoopObserver {
    fn on_event(&self, _event: &EngineEvent) {}
}

/// Fans engine events out to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Returns how many subscribers received the event. No subscribers is fine.
    pub fn send(&self, event: EngineEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopObserver for EventBus {
    fn on_event(&self, event: &EngineEvent) {
        self.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.on_event(&EngineEvent::IterationStarted { iteration: 3 });
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::IterationStarted { iteration: 3 });
    }

    #[test]
    fn sending_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert_eq!(
            bus.send(EngineEvent::CoordinateResolved { point: ScreenPoint::new(1.0, 2.0) }),
            0
        );
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_value(EngineEvent::RecoverableFailure {
            stage: FailureStage::ModelCall,
            detail: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "recoverable_failure");
        assert_eq!(json["stage"], "model_call");
    }
}
