use serde::{Deserialize, Serialize};

use crate::agent_engine::history::ConversationTurn;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Init,
    Running,
    MaxLoopExceeded,
    Error,
    CallUser,
    Finished,
    UserAborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Init | RunStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundState {
    pub index: u32,
    pub status: RunStatus,
    /// Message of the failure that ended the run with `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            index: 0,
            status: RunStatus::Init,
            error: None,
        }
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events delivered to observers, in round order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A round finished (or the run ended): the turns it appended.
    Data {
        round: u32,
        status: RunStatus,
        turns: Vec<ConversationTurn>,
    },
    Error {
        message: String,
    },
}
