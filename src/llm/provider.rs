use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::llm::types::ModelRequest;

/// A vision-capable chat model. Implementations return the raw reply text;
/// interpreting it is the response parser's job.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Provider identifier (matches the config.toml key).
    fn name(&self) -> &str;

    /// One non-streaming completion. Failures are transient `ModelCall` errors.
    async fn complete(&self, request: &ModelRequest) -> PilotResult<String>;
}
