use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::agent_engine::history::ConversationTurn;
use crate::agent_engine::state::{AgentEvent, RunStatus};
use crate::errors::PilotError;

/// Receives progress from a running agent. Calls arrive sequentially.
#[async_trait]
pub trait AgentObserver: Send + Sync {
    /// After every round, and once more with the terminal status.
    async fn on_data(&self, round: u32, status: RunStatus, turns: &[ConversationTurn]);

    /// Once, before the run ends with `Error`.
    async fn on_error(&self, error: &PilotError);
}

/// Forwards events over an mpsc channel. A closed receiver is ignored.
pub struct ChannelObserver {
    tx: mpsc::Sender<AgentEvent>,
}

impl ChannelObserver {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AgentObserver for ChannelObserver {
    async fn on_data(&self, round: u32, status: RunStatus, turns: &[ConversationTurn]) {
        let event = AgentEvent::Data {
            round,
            status,
            turns: turns.to_vec(),
        };
        if self.tx.send(event).await.is_err() {
            tracing::debug!("observer channel closed; event dropped");
        }
    }

    async fn on_error(&self, error: &PilotError) {
        let event = AgentEvent::Error {
            message: error.to_string(),
        };
        if self.tx.send(event).await.is_err() {
            tracing::debug!("observer channel closed; event dropped");
        }
    }
}

/// Discards every event.
pub struct NullObserver;

#[async_trait]
impl AgentObserver for NullObserver {
    async fn on_data(&self, _round: u32, _status: RunStatus, _turns: &[ConversationTurn]) {}
    async fn on_error(&self, _error: &PilotError) {}
}
