use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::types::ParsedAction;
use crate::errors::PilotResult;
use crate::llm::types::ChatMessage;
use crate::perception::types::{ScreenshotContext, ScreenshotOutput};

const OMITTED_SCREENSHOT: &str = "[earlier screenshot omitted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTiming {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cost_ms: u64,
}

impl TurnTiming {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            cost_ms: (end - start).num_milliseconds().max(0) as u64,
        }
    }
}

/// One entry of the run's conversation. Human turns carry the screenshot,
/// agent turns the raw prediction and the actions parsed from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    #[serde(skip)]
    pub screenshot: Option<ScreenshotOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_context: Option<ScreenshotContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predictions: Vec<ParsedAction>,
    /// Set-of-Marks rendering of `predictions`, PNG.
    #[serde(skip)]
    pub som_image: Option<Vec<u8>>,
    pub timing: TurnTiming,
}

impl ConversationTurn {
    pub fn human(screenshot: ScreenshotOutput, context: ScreenshotContext, timing: TurnTiming) -> Self {
        Self {
            role: Role::Human,
            text: String::new(),
            screenshot: Some(screenshot),
            screenshot_context: Some(context),
            predictions: Vec::new(),
            som_image: None,
            timing,
        }
    }

    pub fn agent(prediction: String, actions: Vec<ParsedAction>, timing: TurnTiming) -> Self {
        Self {
            role: Role::Agent,
            text: prediction,
            screenshot: None,
            screenshot_context: None,
            predictions: actions,
            som_image: None,
            timing,
        }
    }
}

/// Builds the request for one model call: the system prompt and the
/// instruction, then the last `max_turns` turns. Only the last `max_images`
/// human turns keep their screenshot; older ones become a text placeholder.
/// Both limits are at least 1 so the newest screenshot is always sent.
pub fn build_messages(
    system_prompt: &str,
    instruction: &str,
    turns: &[ConversationTurn],
    max_turns: usize,
    max_images: usize,
) -> Vec<ChatMessage> {
    let tail = &turns[turns.len().saturating_sub(max_turns.max(1))..];
    let humans_in_tail = tail.iter().filter(|t| t.role == Role::Human).count();
    let first_with_image = humans_in_tail.saturating_sub(max_images.max(1));

    let mut messages = Vec::with_capacity(tail.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.push(ChatMessage::user(instruction));

    let mut human_idx = 0;
    for turn in tail {
        match turn.role {
            Role::Human => {
                let keep_image = human_idx >= first_with_image;
                human_idx += 1;
                match (&turn.screenshot, keep_image) {
                    (Some(shot), true) => messages.push(ChatMessage::user_image(shot.data_url())),
                    _ => messages.push(ChatMessage::user(OMITTED_SCREENSHOT)),
                }
            }
            Role::Agent => messages.push(ChatMessage::assistant(turn.text.clone())),
        }
    }
    messages
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub session_id: String,
    #[serde(flatten)]
    pub turn: ConversationTurn,
}

/// Append-only JSONL log of a run's turns (image bytes excluded).
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

    pub fn append(&self, turn: &ConversationTurn) -> PilotResult<()> {
        let entry = HistoryEntry {
            ts: Utc::now().timestamp_millis(),
            session_id: self.session_id.clone(),
            turn: turn.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %self.file_path.display(), role = ?turn.role, "history entry flushed");
        Ok(())
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// `<data_local_dir>/gui-pilot/sessions`, falling back to the working directory.
fn data_dir_or_cwd() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("gui-pilot").join("sessions");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
