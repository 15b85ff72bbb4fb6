use serde::{Deserialize, Serialize};

use crate::agent_engine::history::HistoryEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(content: MessageContent) -> Self {
        Self {
            role: "user".into(),
            content,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// User turn carrying the goal text followed by the screenshot.
    pub fn goal_with_image(goal: &str, image_url: String) -> Self {
        Self::user(MessageContent::Parts(vec![
            ContentPart::Text {
                text: goal.to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl { url: image_url },
            },
        ]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Everything one completion call needs.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub history: Vec<HistoryEntry>,
    /// The current user turn (goal text + screenshot).
    pub current: ChatMessage,
}

impl ModelRequest {
    /// Flattens into the wire order: system, replayed exchanges, current turn.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2 + self.history.len() * 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        for entry in &self.history {
            messages.push(entry.user_message.clone());
            messages.push(ChatMessage::assistant(entry.assistant_reply.clone()));
        }
        messages.push(self.current.clone());
        messages
    }
}

/// Per-call sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_system_history_current() {
        let req = ModelRequest {
            system_prompt: "sys".into(),
            history: vec![HistoryEntry {
                user_message: ChatMessage::user(MessageContent::Text("old goal".into())),
                assistant_reply: "old reply".into(),
            }],
            current: ChatMessage::goal_with_image("goal", "data:image/png;base64,AAAA".into()),
        };
        let msgs = req.to_messages();
        let roles: Vec<_> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[test]
    fn image_part_serializes_openai_style() {
        let msg = ChatMessage::goal_with_image("open notes", "data:image/png;base64,AAAA".into());
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["type"], "image_url");
        assert_eq!(v["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }
}
