use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::llm::types::{ChatMessage, InvokeOutput};

/// A vision-language model that predicts the next GUI actions.
#[async_trait]
pub trait VlmModel: Send + Sync {
    /// Full multimodal call. An empty prediction is an error, never `Ok`.
    async fn invoke(&self, messages: Vec<ChatMessage>) -> PilotResult<InvokeOutput>;

    /// Text-only call used for planning.
    async fn invoke_text_only(&self, system: &str, user: &str) -> PilotResult<String>;

    /// Quantization factors of the model's box coordinates.
    fn factors(&self) -> [f64; 2];
}
