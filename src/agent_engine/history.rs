use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::PilotResult;
use crate::llm::types::ChatMessage;

/// Number of exchanges replayed to the model each iteration.
pub const CONTEXT_WINDOW: usize = 3;

/// One prompt/reply exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user_message: ChatMessage,
    pub assistant_reply: String,
}

/// Bounded FIFO of the most recent exchanges.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    entries: VecDeque<HistoryEntry>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(CONTEXT_WINDOW + 1),
        }
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > CONTEXT_WINDOW {
            self.entries.pop_front();
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub ts: i64,
    pub iteration: u32,
    pub role: String,
    pub content: String,
}

/// Append-only JSONL transcript of a session, for audit.
pub struct SessionHistory {
    pub session_id: String,
    file_path: PathBuf,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::in_dir(&data_dir_or_cwd())
    }

    pub fn in_dir(dir: &Path) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self {
            session_id,
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn record(&self, iteration: u32, role: &str, content: &str) -> PilotResult<()> {
        let entry = TranscriptEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            iteration,
            role: role.to_string(),
            content: content.to_string(),
        };
        let line = serde_json::to_string(&entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %self.file_path.display(), "transcript entry flushed");
        Ok(())
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// `<local data dir>/screenpilot/sessions`, falling back to the working directory.
fn data_dir_or_cwd() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("screenpilot").join("sessions");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
