use serde::Deserialize;

use crate::agent_engine::prompts::planning_prompt;
use crate::config::Language;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::VlmModel;

#[derive(Debug, Deserialize)]
struct Plan {
    steps: Vec<String>,
}

/// Asks the model for a step list for `instruction`.
pub async fn plan_steps(
    model: &dyn VlmModel,
    instruction: &str,
    language: Language,
) -> PilotResult<Vec<String>> {
    let reply = model
        .invoke_text_only(&planning_prompt(language), instruction)
        .await?;
    let steps = parse_plan(&reply)?;
    tracing::info!(steps = steps.len(), "task plan received");
    Ok(steps)
}

/// Extracts `{"steps": [...]}` from a reply that may wrap it in prose or a
/// code fence.
pub fn parse_plan(reply: &str) -> PilotResult<Vec<String>> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &reply[s..=e],
        _ => return Err(PilotError::Parse(format!("no JSON object in plan reply: {reply}"))),
    };
    let plan: Plan = serde_json::from_str(json)
        .map_err(|e| PilotError::Parse(format!("invalid plan: {e}")))?;
    Ok(plan
        .steps
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// The instruction followed by the numbered plan.
pub fn with_plan(instruction: &str, steps: &[String]) -> String {
    if steps.is_empty() {
        return instruction.to_string();
    }
    let mut out = format!("{instruction}\n\nPlan:");
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("\n{}. {step}", i + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::llm::types::{ChatMessage, InvokeOutput};

    struct PlanModel(&'static str);

    #[async_trait]
    impl VlmModel for PlanModel {
        async fn invoke(&self, _messages: Vec<ChatMessage>) -> PilotResult<InvokeOutput> {
            Err(PilotError::Transport("vision not used".into()))
        }

        async fn invoke_text_only(&self, system: &str, _user: &str) -> PilotResult<String> {
            assert!(system.contains("\"steps\""));
            Ok(self.0.to_string())
        }

        fn factors(&self) -> [f64; 2] {
            [1000.0, 1000.0]
        }
    }

    #[tokio::test]
    async fn test_plan_from_fenced_reply() {
        let model = PlanModel("```json\n{\"steps\": [\"Open Settings\", \" \", \"Tap Wi-Fi\"]}\n```");
        let steps = plan_steps(&model, "turn on wifi", Language::En).await.unwrap();
        assert_eq!(steps, vec!["Open Settings", "Tap Wi-Fi"]);
    }

    #[test]
    fn test_parse_plan_rejects_prose() {
        assert!(matches!(parse_plan("I cannot plan this"), Err(PilotError::Parse(_))));
        assert!(parse_plan("{\"other\": 1}").is_err());
    }

    #[test]
    fn test_with_plan_numbers_steps() {
        let text = with_plan("turn on wifi", &["Open Settings".into(), "Tap Wi-Fi".into()]);
        assert_eq!(text, "turn on wifi\n\nPlan:\n1. Open Settings\n2. Tap Wi-Fi");
        assert_eq!(with_plan("x", &[]), "x");
    }
}
