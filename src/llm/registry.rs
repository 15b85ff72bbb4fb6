use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::VisionModel;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of the configured model providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn VisionModel>>,
    active: String,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn VisionModel>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> PilotResult<Arc<dyn VisionModel>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            PilotError::Config(format!(
                "active provider '{}' is not usable (available: {})",
                self.active,
                self.list_names().join(", ")
            ))
        })
    }

    pub fn set_active(&mut self, name: String) -> PilotResult<()> {
        if self.providers.contains_key(&name) {
            self.active = name;
            Ok(())
        } else {
            Err(PilotError::Config(format!(
                "provider '{name}' not registered (available: {})",
                self.list_names().join(", ")
            )))
        }
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a registry from the loaded app config.
    /// API keys come from `SCREENPILOT_<ID>_API_KEY`, then the provider's `api_key`.
    /// Providers without a key are skipped with a warning; selecting one later
    /// is a configuration error.
    pub fn from_config(config: &AppConfig) -> PilotResult<Self> {
        let mut registry = Self::new(config.llm.active_provider.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("SCREENPILOT_{}_API_KEY", id.to_uppercase()))
                .ok()
                .or_else(|| entry.api_key.clone())
                .filter(|k| !k.trim().is_empty());
            let Some(api_key) = api_key else {
                tracing::warn!(provider = %id, "no API key configured; provider skipped");
                continue;
            };
            let provider = OpenAiCompatibleProvider::new(
                id.clone(),
                &entry.api_base,
                api_key,
                CallConfig {
                    model: entry.model.clone(),
                    temperature: entry.temperature,
                    max_tokens: entry.max_tokens,
                },
                Duration::from_secs(entry.timeout_secs),
            )?;
            tracing::debug!(
                provider = %id,
                model = %entry.model,
                endpoint = %provider.endpoint(),
                "provider registered"
            );
            registry.register(Arc::new(provider));
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ModelRequest;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl VisionModel for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn complete(&self, _request: &ModelRequest) -> PilotResult<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn active_selection() {
        let mut reg = ProviderRegistry::new("zhipu".into());
        assert!(reg.get_active().is_err());
        reg.register(Arc::new(Named("zhipu")));
        reg.register(Arc::new(Named("doubao")));
        assert_eq!(reg.get_active().unwrap().name(), "zhipu");

        reg.set_active("doubao".into()).unwrap();
        assert_eq!(reg.active_name(), "doubao");
        assert!(matches!(reg.set_active("openai".into()), Err(PilotError::Config(_))));
        assert_eq!(reg.list_names(), vec!["doubao", "zhipu"]);
    }

    #[test]
    fn providers_without_keys_are_skipped() {
        let cfg: AppConfig = toml::from_str(
            r#"
[llm]
active_provider = "keyless_test_provider"

[llm.providers.keyless_test_provider]
display_name = "No key"
api_base = "http://localhost:9"
model = "m"

[llm.providers.keyed_test_provider]
display_name = "Keyed"
api_base = "http://localhost:9"
model = "m"
api_key = "sk-test"
"#,
        )
        .unwrap();
        let reg = ProviderRegistry::from_config(&cfg).unwrap();
        assert_eq!(reg.list_names(), vec!["keyed_test_provider"]);
        assert!(matches!(reg.get_active(), Err(PilotError::Config(_))));
    }
}
