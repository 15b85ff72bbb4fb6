use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::agent_engine::event_bus::{EngineEvent, FailureStage, LoopObserver, NoopObserver};
use crate::agent_engine::history::{ConversationContext, HistoryEntry, SessionHistory};
use crate::agent_engine::loop_control::{LoopController, TaskHandle};
use crate::agent_engine::state::{
    AgentCommand, AiDecision, DecisionStatus, IterationResult, TaskOutcome, TerminalState,
};
use crate::config::AppConfig;
use crate::errors::{PilotError, PilotResult};
use crate::executor::dispatcher::{ActionExecutor, ExecutionReport};
use crate::llm::provider::VisionModel;
use crate::llm::response_parser;
use crate::llm::types::{ChatMessage, ModelRequest};
use crate::perception::annotator;
use crate::perception::codec;
use crate::perception::screenshot::ScreenCapture;
use crate::perception::types::Screenshot;

/// Loop pacing and output locations.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_iterations: u32,
    pub capture_cooldown: Duration,
    pub model_backoff: Duration,
    /// Pause when a decision carries nothing to do.
    pub idle_delay: Duration,
    /// Where annotated screenshots go; `None` disables annotation.
    pub label_dir: Option<PathBuf>,
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let exec = &cfg.execution;
        Self {
            max_iterations: exec.max_iterations,
            capture_cooldown: Duration::from_millis(exec.capture_cooldown_ms),
            model_backoff: Duration::from_millis(exec.model_backoff_ms),
            idle_delay: Duration::from_millis(exec.idle_delay_ms),
            label_dir: cfg.screenshot.annotate.then(|| cfg.screenshot.label_dir.clone()),
        }
    }
}

/// The perceive-decide-act loop. Owns its collaborators and the bounded
/// conversation context, which survives from one goal to the next.
pub struct AgentEngine {
    capture: Box<dyn ScreenCapture>,
    model: Arc<dyn VisionModel>,
    executor: ActionExecutor,
    system_prompt: String,
    context: ConversationContext,
    handle: TaskHandle,
    observer: Arc<dyn LoopObserver>,
    transcript: Option<SessionHistory>,
    settings: EngineSettings,
}

impl AgentEngine {
    pub fn new(
        capture: Box<dyn ScreenCapture>,
        model: Arc<dyn VisionModel>,
        executor: ActionExecutor,
        system_prompt: String,
        settings: EngineSettings,
    ) -> Self {
        Self {
            capture,
            model,
            executor,
            system_prompt,
            context: ConversationContext::new(),
            handle: TaskHandle::new(),
            observer: Arc::new(NoopObserver),
            transcript: None,
            settings,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoopObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Shares an externally created handle, e.g. one the CLI cancels from Ctrl+C.
    pub fn with_handle(mut self, handle: TaskHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_transcript(mut self, transcript: SessionHistory) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Waits for goals on `rx` and runs each to completion. Outcomes are
    /// reported through the observer as `TaskFinished`.
    pub async fn run_loop(&mut self, mut rx: mpsc::Receiver<AgentCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                AgentCommand::Goal(goal) => {
                    let goal = goal.trim();
                    if goal.is_empty() {
                        continue;
                    }
                    self.run_task(goal).await;
                }
                AgentCommand::Shutdown => break,
            }
        }
        tracing::info!("engine worker stopped");
    }

    /// Drives one goal until a terminal state.
    pub async fn run_task(&mut self, goal: &str) -> TaskOutcome {
        tracing::info!(goal = %goal, max_iterations = self.settings.max_iterations, "task started");
        self.handle.begin();
        let mut ctl = LoopController::new(self.settings.max_iterations);

        let state = loop {
            if self.handle.is_cancelled() {
                tracing::info!(iteration = ctl.iteration(), "cancellation requested");
                break TerminalState::Cancelled;
            }
            if ctl.exhausted() {
                break TerminalState::Exhausted;
            }
            let iteration = ctl.next_iteration();
            match self.iterate(goal, iteration).await {
                IterationResult::Continue => {}
                IterationResult::Terminal(state) => break state,
            }
        };

        self.handle.finish();
        let outcome = TaskOutcome::new(state, ctl.iteration(), ctl.max_iterations());
        tracing::info!(
            state = ?outcome.state,
            iterations = outcome.iterations,
            summary = %outcome.summary,
            "task finished"
        );
        self.notify(EngineEvent::TaskFinished {
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn iterate(&mut self, goal: &str, iteration: u32) -> IterationResult {
        self.notify(EngineEvent::IterationStarted { iteration });
        tracing::info!(iteration, "iteration started");

        let shot = match self.capture.capture() {
            Ok(shot) => shot,
            Err(e) if !e.is_recoverable() => return self.abort(FailureStage::Capture, &e),
            Err(e) => {
                self.recoverable(FailureStage::Capture, &e);
                tokio::time::sleep(self.settings.capture_cooldown).await;
                return IterationResult::Continue;
            }
        };

        let png = match codec::encode_png(&shot.image) {
            Ok(png) => png,
            Err(e) if !e.is_recoverable() => return self.abort(FailureStage::Encode, &e),
            Err(e) => {
                self.recoverable(FailureStage::Encode, &e);
                tokio::time::sleep(self.settings.capture_cooldown).await;
                return IterationResult::Continue;
            }
        };

        let user_message = ChatMessage::goal_with_image(goal, codec::to_data_url(&png));
        let request = ModelRequest {
            system_prompt: self.system_prompt.clone(),
            history: self.context.snapshot(),
            current: user_message.clone(),
        };
        self.record(iteration, "user", goal);

        let raw = match self.model.complete(&request).await {
            Ok(raw) => raw,
            Err(e) if !e.is_recoverable() => return self.abort(FailureStage::ModelCall, &e),
            Err(e) => {
                self.recoverable(FailureStage::ModelCall, &e);
                tokio::time::sleep(self.settings.model_backoff).await;
                return IterationResult::Continue;
            }
        };
        tracing::info!(iteration, response = %raw, "model replied");
        self.record(iteration, "assistant", &raw);
        self.context.append(HistoryEntry {
            user_message,
            assistant_reply: raw.clone(),
        });

        let decision = response_parser::parse(&raw);
        self.notify(EngineEvent::DecisionParsed {
            status: decision.status,
            kind: decision.action.kind(),
            description: decision.description.clone(),
        });

        match decision.status {
            DecisionStatus::Completed => return IterationResult::Terminal(TerminalState::Success),
            DecisionStatus::Failed => return IterationResult::Terminal(TerminalState::Failure),
            DecisionStatus::InProgress => {}
        }

        if !decision.action.is_actionable() {
            tracing::info!(iteration, kind = %decision.action.kind(), "nothing to act on");
            tokio::time::sleep(self.settings.idle_delay).await;
            return IterationResult::Continue;
        }

        // The model call may have taken a while; honour a cancel issued meanwhile.
        if self.handle.is_cancelled() {
            tracing::info!(iteration, "cancelled before dispatch");
            return IterationResult::Terminal(TerminalState::Cancelled);
        }

        match self.act(&decision, &shot) {
            Ok(report) => {
                self.record(iteration, "action", &report.summary);
                self.annotate(iteration, &shot, &report);
                for point in &report.points {
                    self.notify(EngineEvent::CoordinateResolved { point: *point });
                }
            }
            Err(e) if !e.is_recoverable() => return self.abort(FailureStage::Action, &e),
            Err(e) => self.recoverable(FailureStage::Action, &e),
        }
        IterationResult::Continue
    }

    fn act(&mut self, decision: &AiDecision, shot: &Screenshot) -> PilotResult<ExecutionReport> {
        let (w, h) = shot.dimensions();
        tracing::info!(
            kind = %decision.action.kind(),
            target = %decision.target,
            description = %decision.description,
            "executing action"
        );
        self.executor.execute(&decision.action, shot.scale, Some(w), Some(h))
    }

    fn annotate(&self, iteration: u32, shot: &Screenshot, report: &ExecutionReport) {
        let Some(dir) = &self.settings.label_dir else {
            return;
        };
        let marked = annotator::mark_points(shot, &report.points);
        match annotator::write_label(dir, iteration, &marked) {
            Ok(path) => tracing::debug!(path = %path.display(), "label written"),
            Err(e) => self.recoverable(FailureStage::Annotate, &e),
        }
    }

    fn recoverable(&self, stage: FailureStage, error: &PilotError) {
        tracing::warn!(?stage, error = %error, "recoverable failure");
        self.notify(EngineEvent::RecoverableFailure {
            stage,
            detail: error.to_string(),
        });
    }

    /// Errors outside the recoverable set end the task as a failure.
    fn abort(&self, stage: FailureStage, error: &PilotError) -> IterationResult {
        tracing::error!(?stage, error = %error, "unrecoverable failure");
        IterationResult::Terminal(TerminalState::Failure)
    }

    fn record(&self, iteration: u32, role: &str, content: &str) {
        if let Some(transcript) = &self.transcript {
            if let Err(e) = transcript.record(iteration, role, content) {
                tracing::warn!(error = %e, "transcript write failed");
            }
        }
    }

    fn notify(&self, event: EngineEvent) {
        self.observer.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::dispatcher::ExecutorSettings;
    use crate::executor::input::InputInjector;
    use crate::executor::keymap::KeyMap;
    use crate::perception::types::ScreenPoint;
    use async_trait::async_trait;
    use image::RgbaImage;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeScreen {
        failures_left: u32,
    }

    impl ScreenCapture for FakeScreen {
        fn capture(&mut self) -> PilotResult<Screenshot> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(PilotError::Capture("display asleep".into()));
            }
            Ok(Screenshot {
                image: RgbaImage::new(1000, 800),
                scale: 1.0,
            })
        }
    }

    /// Replays scripted replies; once exhausted keeps answering `fallback`.
    struct ScriptedModel {
        replies: Mutex<VecDeque<PilotResult<String>>>,
        fallback: String,
        calls: Mutex<Vec<ModelRequest>>,
        cancel_on_call: Option<TaskHandle>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<PilotResult<String>>, fallback: &str) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: fallback.to_string(),
                calls: Mutex::new(Vec::new()),
                cancel_on_call: None,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ModelRequest) -> PilotResult<String> {
            self.calls.lock().unwrap().push(request.clone());
            if let Some(handle) = &self.cancel_on_call {
                handle.cancel();
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    #[derive(Clone, Default)]
    struct Pointer {
        moves: Arc<Mutex<Vec<ScreenPoint>>>,
        clicks: Arc<Mutex<u32>>,
    }

    impl InputInjector for Pointer {
        fn move_to(&mut self, point: ScreenPoint, _duration: Duration) -> PilotResult<()> {
            self.moves.lock().unwrap().push(point);
            Ok(())
        }
        fn click(&mut self) -> PilotResult<()> {
            *self.clicks.lock().unwrap() += 1;
            Ok(())
        }
        fn double_click(&mut self) -> PilotResult<()> {
            Ok(())
        }
        fn right_click(&mut self) -> PilotResult<()> {
            Err(PilotError::Action("right button unavailable".into()))
        }
        fn mouse_down(&mut self) -> PilotResult<()> {
            Ok(())
        }
        fn scroll(&mut self, _notches: i32) -> PilotResult<()> {
            Ok(())
        }
        fn drag_to(&mut self, point: ScreenPoint, _duration: Duration) -> PilotResult<()> {
            self.moves.lock().unwrap().push(point);
            Ok(())
        }
        fn key_combo(&mut self, _keys: &[String]) -> PilotResult<()> {
            Ok(())
        }
        fn clipboard_copy(&mut self, _text: &str) -> PilotResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<EngineEvent>>);

    impl LoopObserver for Collect {
        fn on_event(&self, event: &EngineEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn settings(max_iterations: u32) -> EngineSettings {
        EngineSettings {
            max_iterations,
            capture_cooldown: Duration::ZERO,
            model_backoff: Duration::ZERO,
            idle_delay: Duration::ZERO,
            label_dir: None,
        }
    }

    fn engine(
        screen: FakeScreen,
        model: Arc<ScriptedModel>,
        pointer: &Pointer,
        settings: EngineSettings,
    ) -> AgentEngine {
        let executor = ActionExecutor::new(
            Box::new(pointer.clone()),
            KeyMap::standard(),
            ExecutorSettings::immediate(),
        );
        AgentEngine::new(Box::new(screen), model, executor, "system".into(), settings)
    }

    const CLICK_CENTRE: &str =
        r#"{"status":"in_progress","action":{"type":"click","coordinates":[500,500]}}"#;
    const DONE: &str = "```json\n{\"status\":\"completed\"}\n```";
    const WAITING: &str = r#"{"status":"in_progress","action":{"type":"wait"}}"#;

    #[tokio::test]
    async fn fenced_completion_ends_with_success() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(DONE.into())], WAITING));
        let pointer = Pointer::default();
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(5));

        let outcome = eng.run_task("open the browser").await;
        assert_eq!(outcome.state, TerminalState::Success);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.summary, "task completed");
        assert_eq!(model.call_count(), 1);
        assert!(pointer.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn click_is_mapped_annotated_and_observed() {
        let labels = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(
            vec![Ok(CLICK_CENTRE.into()), Ok(DONE.into())],
            WAITING,
        ));
        let pointer = Pointer::default();
        let observer = Arc::new(Collect::default());
        let mut cfg = settings(5);
        cfg.label_dir = Some(labels.path().to_path_buf());
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, cfg)
            .with_observer(observer.clone());

        let outcome = eng.run_task("click the middle").await;
        assert_eq!(outcome.state, TerminalState::Success);
        assert_eq!(outcome.iterations, 2);

        let expected = ScreenPoint::new(500.0, 400.0);
        assert_eq!(*pointer.moves.lock().unwrap(), vec![expected]);
        assert_eq!(*pointer.clicks.lock().unwrap(), 1);
        assert!(labels.path().join("screen_label1.png").exists());

        let events = observer.0.lock().unwrap();
        assert!(events.contains(&EngineEvent::CoordinateResolved { point: expected }));
        assert!(matches!(events.last(), Some(EngineEvent::TaskFinished { .. })));

        // second request replays the first exchange
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[1].history.len(), 1);
        assert_eq!(calls[1].history[0].assistant_reply, CLICK_CENTRE);
        assert_eq!(eng.context().len(), 2);
    }

    #[tokio::test]
    async fn preset_cancellation_skips_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![], WAITING));
        let pointer = Pointer::default();
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(5));
        eng.handle().cancel();

        let outcome = eng.run_task("anything").await;
        assert_eq!(outcome.state, TerminalState::Cancelled);
        assert_eq!(outcome.summary, "interrupted by user");
        assert_eq!(model.call_count(), 0);
        assert!(!eng.handle().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_during_model_call_stops_before_dispatch() {
        let pointer = Pointer::default();
        let handle = TaskHandle::new();
        let mut model = ScriptedModel::new(vec![Ok(CLICK_CENTRE.into())], WAITING);
        model.cancel_on_call = Some(handle.clone());
        let model = Arc::new(model);
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(5))
            .with_handle(handle);

        let outcome = eng.run_task("click").await;
        assert_eq!(outcome.state, TerminalState::Cancelled);
        assert_eq!(model.call_count(), 1);
        assert!(pointer.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ceiling_yields_exhaustion() {
        let model = Arc::new(ScriptedModel::new(vec![], WAITING));
        let pointer = Pointer::default();
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(3));

        let outcome = eng.run_task("never finishes").await;
        assert_eq!(outcome.state, TerminalState::Exhausted);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.summary, "reached maximum iterations (3)");
        assert_eq!(eng.context().len(), 3);
    }

    #[tokio::test]
    async fn recoverable_failures_count_but_do_not_terminate() {
        let model = Arc::new(ScriptedModel::new(
            vec![
                Err(PilotError::ModelCall("timeout".into())),
                Ok(DONE.into()),
            ],
            WAITING,
        ));
        let pointer = Pointer::default();
        let observer = Arc::new(Collect::default());
        let mut eng = engine(FakeScreen { failures_left: 1 }, model.clone(), &pointer, settings(5))
            .with_observer(observer.clone());

        let outcome = eng.run_task("flaky").await;
        assert_eq!(outcome.state, TerminalState::Success);
        // capture failure, model failure, success
        assert_eq!(outcome.iterations, 3);
        assert_eq!(model.call_count(), 2);

        let failures: Vec<FailureStage> = observer
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::RecoverableFailure { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![FailureStage::Capture, FailureStage::ModelCall]);
    }

    #[tokio::test]
    async fn unrecoverable_model_error_fails_the_task() {
        let model = Arc::new(ScriptedModel::new(
            vec![Err(PilotError::Config("api key rejected".into()))],
            DONE,
        ));
        let pointer = Pointer::default();
        let observer = Arc::new(Collect::default());
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(5))
            .with_observer(observer.clone());

        let outcome = eng.run_task("anything").await;
        assert_eq!(outcome.state, TerminalState::Failure);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(model.call_count(), 1);
        assert!(!eng.handle().is_running());
        assert!(!observer
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, EngineEvent::RecoverableFailure { .. })));
    }

    #[tokio::test]
    async fn cancel_between_handoff_and_start_is_honoured() {
        let model = Arc::new(ScriptedModel::new(Vec::new(), CLICK_CENTRE));
        let pointer = Pointer::default();
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(5));
        let handle = eng.handle();
        handle.begin();
        assert!(handle.is_running());
        handle.cancel();

        let outcome = eng.run_task("queued goal").await;
        assert_eq!(outcome.state, TerminalState::Cancelled);
        assert_eq!(model.call_count(), 0);
        assert!(!handle.is_running());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn persistent_capture_failure_exhausts() {
        let model = Arc::new(ScriptedModel::new(vec![], WAITING));
        let pointer = Pointer::default();
        let screen = FakeScreen {
            failures_left: u32::MAX,
        };
        let mut eng = engine(screen, model.clone(), &pointer, settings(2));

        let outcome = eng.run_task("blind").await;
        assert_eq!(outcome.state, TerminalState::Exhausted);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_status_and_action_errors() {
        let model = Arc::new(ScriptedModel::new(
            vec![
                Ok(r#"{"status":"in_progress","action":{"type":"right_click","coordinates":[10,10]}}"#.into()),
                Ok(r#"{"status":"failed","description":"no such window"}"#.into()),
            ],
            WAITING,
        ));
        let pointer = Pointer::default();
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(5));

        let outcome = eng.run_task("right click").await;
        assert_eq!(outcome.state, TerminalState::Failure);
        assert_eq!(outcome.summary, "task failed or too complex");
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn run_loop_serves_goals_until_shutdown() {
        let model = Arc::new(ScriptedModel::new(vec![], DONE));
        let pointer = Pointer::default();
        let observer = Arc::new(Collect::default());
        let mut eng = engine(FakeScreen { failures_left: 0 }, model.clone(), &pointer, settings(5))
            .with_observer(observer.clone());

        let (tx, rx) = mpsc::channel(4);
        tx.send(AgentCommand::Goal("first".into())).await.unwrap();
        tx.send(AgentCommand::Goal("   ".into())).await.unwrap();
        tx.send(AgentCommand::Goal("second".into())).await.unwrap();
        tx.send(AgentCommand::Shutdown).await.unwrap();
        eng.run_loop(rx).await;

        let finished = observer
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, EngineEvent::TaskFinished { .. }))
            .count();
        assert_eq!(finished, 2);
        assert_eq!(model.call_count(), 2);
        // context carries over between goals
        assert_eq!(model.calls.lock().unwrap()[1].history.len(), 1);
    }

    #[tokio::test]
    async fn transcript_records_each_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = SessionHistory::in_dir(dir.path());
        let path = transcript.path().to_path_buf();
        let model = Arc::new(ScriptedModel::new(vec![Ok(CLICK_CENTRE.into())], DONE));
        let pointer = Pointer::default();
        let mut eng = engine(FakeScreen { failures_left: 0 }, model, &pointer, settings(5))
            .with_transcript(transcript);

        eng.run_task("log it").await;
        let text = std::fs::read_to_string(path).unwrap();
        let roles: Vec<String> = text
            .lines()
            .map(|l| {
                let record: serde_json::Value = serde_json::from_str(l).unwrap();
                record["role"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "action", "user", "assistant"]);
    }
}
