use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Screen capture error: {0}")]
    Capture(String),

    #[error("Image encode error: {0}")]
    Encode(String),

    #[error("Model call error: {0}")]
    ModelCall(String),

    #[error("Action execution error: {0}")]
    Action(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl PilotError {
    /// Recoverable errors cost one iteration; everything else aborts the task.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PilotError::Capture(_)
                | PilotError::Encode(_)
                | PilotError::ModelCall(_)
                | PilotError::Action(_)
                | PilotError::Http(_)
        )
    }
}

pub type PilotResult<T> = Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_taxonomy() {
        assert!(PilotError::Capture("no monitor".into()).is_recoverable());
        assert!(PilotError::Encode("png".into()).is_recoverable());
        assert!(PilotError::ModelCall("timeout".into()).is_recoverable());
        assert!(PilotError::Action("enigo".into()).is_recoverable());
        assert!(!PilotError::Config("missing key".into()).is_recoverable());
    }
}
