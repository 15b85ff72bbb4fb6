use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};

use screenpilot_lib::agent_engine::event_bus::{EngineEvent, EventBus};
use screenpilot_lib::agent_engine::history::SessionHistory;
use screenpilot_lib::agent_engine::loop_control::TaskHandle;
use screenpilot_lib::agent_engine::state::{AgentCommand, TaskOutcome, TerminalState};
use screenpilot_lib::config::{load_config, AppConfig};
use screenpilot_lib::executor::dispatcher::{ActionExecutor, ExecutorSettings};
use screenpilot_lib::executor::input::EnigoInjector;
use screenpilot_lib::executor::keymap::KeyMap;
use screenpilot_lib::llm::prompt::load_system_prompt;
use screenpilot_lib::llm::provider::VisionModel;
use screenpilot_lib::llm::registry::ProviderRegistry;
use screenpilot_lib::perception::annotator::clear_label_dir;
use screenpilot_lib::perception::screenshot::XcapCapture;
use screenpilot_lib::{init_tracing, AgentEngine, EngineSettings, PilotError, PilotResult};

#[derive(Parser, Debug)]
#[command(
    name = "screenpilot",
    version,
    about = "Drive the mouse and keyboard with a vision model until a goal is reached"
)]
struct Cli {
    /// Path to config.toml (default: next to the executable, then the working directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Provider id from [llm.providers], overriding active_provider
    #[arg(long)]
    provider: Option<String>,
    /// Iteration ceiling per goal, overriding execution.max_iterations
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Run this goal once and exit; without it an interactive prompt starts
    goal: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "screenpilot aborted");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> PilotResult<ExitCode> {
    let (mut cfg, _path) = load_config(cli.config.as_deref())?;
    if let Some(n) = cli.max_iterations {
        cfg.execution.max_iterations = n;
    }
    cfg.validate()?;

    let mut registry = ProviderRegistry::from_config(&cfg)?;
    if let Some(provider) = cli.provider {
        registry.set_active(provider)?;
    }
    let model = registry.get_active()?;
    let system_prompt = load_system_prompt(&cfg.prompts)?;
    if cfg.screenshot.annotate {
        if let Err(e) = clear_label_dir(&cfg.screenshot.label_dir) {
            tracing::warn!(error = %e, "could not clear label directory");
        }
    }
    tracing::info!(provider = %registry.active_name(), model = %model.name(), "ready");

    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let handle = TaskHandle::new();
    let (cmd_tx, cmd_rx) = mpsc::channel::<AgentCommand>(8);

    let (worker, ready) =
        spawn_engine_worker(cfg, model, system_prompt, bus, handle.clone(), cmd_rx)?;
    ready
        .await
        .map_err(|_| PilotError::Config("engine worker exited during startup".into()))??;

    spawn_interrupt_listener(handle.clone());

    let code = match cli.goal {
        Some(goal) if goal.trim().is_empty() => {
            return Err(PilotError::Config("goal must not be empty".into()));
        }
        Some(goal) => {
            let outcome = submit(&cmd_tx, &mut events, &handle, goal).await?;
            if outcome.state == TerminalState::Success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            interactive(&cmd_tx, &mut events, &handle).await?;
            ExitCode::SUCCESS
        }
    };

    let _ = cmd_tx.send(AgentCommand::Shutdown).await;
    if tokio::task::spawn_blocking(move || worker.join()).await.is_err() {
        tracing::warn!("engine worker did not shut down cleanly");
    }
    Ok(code)
}

/// The engine lives on its own thread with a current-thread runtime: input
/// injection blocks for the length of each gesture and the enigo handle is
/// not `Send`.
fn spawn_engine_worker(
    cfg: AppConfig,
    model: Arc<dyn VisionModel>,
    system_prompt: String,
    bus: EventBus,
    handle: TaskHandle,
    rx: mpsc::Receiver<AgentCommand>,
) -> PilotResult<(std::thread::JoinHandle<()>, oneshot::Receiver<PilotResult<()>>)> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let worker = std::thread::Builder::new()
        .name("screenpilot-engine".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready_tx.send(Err(PilotError::Io(e)));
                    return;
                }
            };
            let injector = match EnigoInjector::new() {
                Ok(injector) => injector,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let executor = ActionExecutor::new(
                Box::new(injector),
                KeyMap::for_host(),
                ExecutorSettings::from_config(&cfg.execution),
            );
            let mut engine = AgentEngine::new(
                Box::new(XcapCapture::new(&cfg.screenshot)),
                model,
                executor,
                system_prompt,
                EngineSettings::from_config(&cfg),
            )
            .with_observer(Arc::new(bus))
            .with_handle(handle);
            if cfg.session.transcript {
                let transcript = SessionHistory::new();
                tracing::info!(path = %transcript.path().display(), "session transcript");
                engine = engine.with_transcript(transcript);
            }

            let _ = ready_tx.send(Ok(()));
            runtime.block_on(engine.run_loop(rx));
        })?;
    Ok((worker, ready_rx))
}

/// Ctrl+C during a task cancels it at the next iteration boundary; when idle it exits.
fn spawn_interrupt_listener(handle: TaskHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_running() {
                eprintln!("\ninterrupt received, stopping after the current step");
                handle.cancel();
            } else {
                eprintln!();
                std::process::exit(130);
            }
        }
    });
}

async fn submit(
    tx: &mpsc::Sender<AgentCommand>,
    events: &mut broadcast::Receiver<EngineEvent>,
    handle: &TaskHandle,
    goal: String,
) -> PilotResult<TaskOutcome> {
    // Running from the moment the goal is queued, so Ctrl+C cancels it.
    handle.begin();
    tx.send(AgentCommand::Goal(goal))
        .await
        .map_err(|_| PilotError::Config("engine worker is gone".into()))?;

    loop {
        match events.recv().await {
            Ok(EngineEvent::DecisionParsed { kind, description, .. }) => {
                if !description.is_empty() {
                    println!("[{kind}] {description}");
                }
            }
            Ok(EngineEvent::CoordinateResolved { point }) => println!("  pointer -> {point}"),
            Ok(EngineEvent::RecoverableFailure { stage, detail }) => {
                println!("  {stage:?} failed: {detail}")
            }
            Ok(EngineEvent::TaskFinished { outcome }) => {
                println!("{} ({} iterations)", outcome.summary, outcome.iterations);
                return Ok(outcome);
            }
            Ok(EngineEvent::IterationStarted { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(PilotError::Config("engine worker stopped unexpectedly".into()));
            }
        }
    }
}

async fn interactive(
    tx: &mpsc::Sender<AgentCommand>,
    events: &mut broadcast::Receiver<EngineEvent>,
    handle: &TaskHandle,
) -> PilotResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("goal> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let goal = line.trim();
        match goal {
            "" => continue,
            "quit" | "exit" | "q" => return Ok(()),
            _ => {
                submit(tx, events, handle, goal.to_string()).await?;
            }
        }
    }
}
