use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::VisionModel;
use crate::llm::types::{CallConfig, ModelRequest};

pub struct OpenAiCompatibleProvider {
    id: String,
    endpoint: String,
    api_key: String,
    cfg: CallConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: String,
        api_base: &str,
        api_key: String,
        cfg: CallConfig,
        timeout: Duration,
    ) -> PilotResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id,
            endpoint: chat_endpoint(api_base),
            api_key,
            cfg,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl VisionModel for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &ModelRequest) -> PilotResult<String> {
        let body = serde_json::json!({
            "model": self.cfg.model,
            "messages": request.to_messages(),
            "max_tokens": self.cfg.max_tokens,
            "temperature": self.cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %self.cfg.model,
            history = request.history.len(),
            "sending model request"
        );
        tracing::debug!(
            body = %serde_json::to_string(&redact_images(&body)).unwrap_or_default(),
            "request body (base64 omitted)"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::ModelCall(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::ModelCall(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PilotError::ModelCall(format!("invalid response body: {e}")))?;
        let content = extract_content(&json)?;

        tracing::info!(content_len = content.len(), "model response received");
        Ok(content)
    }
}

/// Accepts either a base URL or a full chat-completions URL.
fn chat_endpoint(api_base: &str) -> String {
    let base = api_base.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn extract_content(json: &serde_json::Value) -> PilotResult<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| {
            let detail = json["error"]["message"]
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| json.to_string());
            PilotError::ModelCall(format!("no content in model response: {detail}"))
        })
}

/// Copy of the request body with image payloads replaced, for logging only.
fn redact_images(body: &serde_json::Value) -> serde_json::Value {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    log_body
}
