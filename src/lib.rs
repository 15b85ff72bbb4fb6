pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

pub use agent_engine::engine::{AgentEngine, EngineSettings};
pub use agent_engine::state::{TaskOutcome, TerminalState};
pub use errors::{PilotError, PilotResult};

/// Installs the global fmt subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
