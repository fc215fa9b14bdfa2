use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::action::parser::{parse_prediction, ParseContext};
use crate::action::types::ParsedAction;
use crate::agent_engine::event_bus::{AgentObserver, NullObserver};
use crate::agent_engine::history::{build_messages, ConversationTurn, SessionHistory, TurnTiming};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::prompts::system_prompt;
use crate::agent_engine::retry::{with_retry, RetryBudget, RetryPhase};
use crate::agent_engine::state::{RoundState, RunStatus};
use crate::config::{AgentConfig, RetryConfig};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::VlmModel;
use crate::llm::types::{ChatMessage, InvokeOutput};
use crate::operator::{manifest_text, Operator};
use crate::perception::annotator::mark_actions;
use crate::perception::types::{ScreenshotContext, ScreenshotOutput};

/// How a round ended.
#[derive(Debug, PartialEq)]
enum RoundOutcome {
    Continue,
    Terminal(RunStatus, Option<String>),
}

/// Drives one operator toward an instruction, round by round.
///
/// The engine itself is immutable and can be shared; every call to
/// [`AgentEngine::run`] owns its own history, round counter and budgets.
pub struct AgentEngine {
    operator: Arc<dyn Operator>,
    model: Arc<dyn VlmModel>,
    observer: Arc<dyn AgentObserver>,
    agent: AgentConfig,
    retry: RetryConfig,
    system_prompt: String,
}

impl AgentEngine {
    pub fn new(
        operator: Arc<dyn Operator>,
        model: Arc<dyn VlmModel>,
        agent: AgentConfig,
        retry: RetryConfig,
    ) -> Self {
        let system_prompt = system_prompt(&manifest_text(operator.as_ref()), agent.language);
        Self {
            operator,
            model,
            observer: Arc::new(NullObserver),
            agent,
            retry,
            system_prompt,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs until a terminal status and returns the final round state.
    pub async fn run(&self, instruction: &str, cancel: &CancellationToken) -> RoundState {
        let history = self.agent.persist_history.then(SessionHistory::new);
        if let Some(h) = &history {
            tracing::info!(session = %h.session_id, path = %h.path().display(), "session history enabled");
        }

        let mut ctrl = LoopController::new(self.agent.max_loop_count);
        let mut turns: Vec<ConversationTurn> = Vec::new();
        let mut state = RoundState::new();
        state.status = RunStatus::Running;

        tracing::info!(
            operator = self.operator.name(),
            instruction = %instruction,
            max_loops = self.agent.max_loop_count,
            "agent run started"
        );

        loop {
            state.index = ctrl.round();

            if cancel.is_cancelled() {
                return self.finish(state, RunStatus::UserAborted, None, &[]).await;
            }
            if ctrl.should_stop() {
                tracing::warn!(rounds = state.index, "max loop count reached");
                return self.finish(state, RunStatus::MaxLoopExceeded, None, &[]).await;
            }

            let start = turns.len();
            let outcome = self
                .run_round(instruction, state.index, &mut turns, history.as_ref(), cancel)
                .await;
            let delta = &turns[start..];

            match outcome {
                Ok(RoundOutcome::Continue) => {
                    self.observer.on_data(state.index, RunStatus::Running, delta).await;
                }
                Ok(RoundOutcome::Terminal(status, error)) => {
                    return self.finish(state, status, error, delta).await;
                }
                Err(PilotError::Cancelled) => {
                    return self.finish(state, RunStatus::UserAborted, None, delta).await;
                }
                Err(e) => {
                    tracing::error!(round = state.index, error = %e, "round failed");
                    self.observer.on_error(&e).await;
                    return self.finish(state, RunStatus::Error, Some(e.to_string()), delta).await;
                }
            }

            if self.agent.loop_interval_ms > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        state.index = ctrl.round();
                        return self.finish(state, RunStatus::UserAborted, None, &[]).await;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(self.agent.loop_interval_ms)) => {}
                }
            }
            ctrl.advance();
        }
    }

    async fn finish(
        &self,
        mut state: RoundState,
        status: RunStatus,
        error: Option<String>,
        delta: &[ConversationTurn],
    ) -> RoundState {
        state.status = status;
        state.error = error;
        tracing::info!(round = state.index, status = ?status, "agent run ended");
        self.observer.on_data(state.index, status, delta).await;
        state
    }

    async fn run_round(
        &self,
        instruction: &str,
        round: u32,
        turns: &mut Vec<ConversationTurn>,
        history: Option<&SessionHistory>,
        cancel: &CancellationToken,
    ) -> PilotResult<RoundOutcome> {
        // ── Observe ────────────────────────────────────────────────────────
        let shot_started = Utc::now();
        let mut budget = RetryBudget::from_config(RetryPhase::Screenshot, &self.retry);
        let operator = self.operator.as_ref();
        let (shot, screen) = with_retry(&mut budget, cancel, || capture(operator)).await?;
        tracing::info!(round, width = screen.width, height = screen.height, "screenshot taken");

        let human = ConversationTurn::human(shot.clone(), screen, TurnTiming::between(shot_started, Utc::now()));
        persist(history, &human);
        turns.push(human);

        // ── Predict ────────────────────────────────────────────────────────
        let messages = build_messages(
            &self.system_prompt,
            instruction,
            turns,
            self.agent.max_history_turns,
            self.agent.max_history_images,
        );
        let model_started = Utc::now();
        let mut budget = RetryBudget::from_config(RetryPhase::Model, &self.retry);
        let model = self.model.as_ref();
        let output = with_retry(&mut budget, cancel, || invoke_checked(model, messages.clone())).await?;

        let ctx = ParseContext::new(screen).with_factors(self.model.factors());
        let prediction = parse_prediction(&output.prediction, &ctx);
        tracing::info!(
            round,
            cost_ms = output.cost_ms,
            actions = prediction.actions.len(),
            thought = %prediction.thought,
            "prediction parsed"
        );

        let som_image = if self.agent.mark_predictions && !prediction.actions.is_empty() {
            match mark_actions(&shot.image_bytes, &prediction.actions, shot.scale_factor) {
                Ok(png) => Some(png),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to render prediction marks");
                    None
                }
            }
        } else {
            None
        };

        // ── Act ────────────────────────────────────────────────────────────
        let mut outcome = RoundOutcome::Continue;
        for action in &prediction.actions {
            match action {
                ParsedAction::Finished { content } => {
                    tracing::info!(round, summary = ?content, "task finished");
                    outcome = RoundOutcome::Terminal(RunStatus::Finished, None);
                }
                ParsedAction::CallUser => {
                    tracing::info!(round, "model asked for the user");
                    outcome = RoundOutcome::Terminal(RunStatus::CallUser, None);
                }
                ParsedAction::Error { message } => {
                    tracing::error!(round, message = %message, "model reported an error");
                    outcome = RoundOutcome::Terminal(RunStatus::Error, Some(message.clone()));
                }
                _ => {
                    let mut budget = RetryBudget::from_config(RetryPhase::Execute, &self.retry);
                    let result = with_retry(&mut budget, cancel, || self.operator.execute(action)).await;
                    match result {
                        Ok(()) => {}
                        Err(PilotError::Cancelled) => return Err(PilotError::Cancelled),
                        Err(e) => {
                            tracing::warn!(round, action = action.action_type(), error = %e, "action failed; continuing");
                        }
                    }
                }
            }
            if outcome != RoundOutcome::Continue {
                break;
            }
        }

        let mut agent = ConversationTurn::agent(
            output.prediction,
            prediction.actions,
            TurnTiming::between(model_started, Utc::now()),
        );
        agent.som_image = som_image;
        persist(history, &agent);
        turns.push(agent);

        Ok(outcome)
    }
}

async fn capture(operator: &dyn Operator) -> PilotResult<(ScreenshotOutput, ScreenshotContext)> {
    let shot = operator.screenshot().await?;
    let screen = shot.context()?;
    Ok((shot, screen))
}

async fn invoke_checked(model: &dyn VlmModel, messages: Vec<ChatMessage>) -> PilotResult<InvokeOutput> {
    let out = model.invoke(messages).await?;
    if out.prediction.trim().is_empty() {
        return Err(PilotError::Transport("model returned an empty prediction".into()));
    }
    Ok(out)
}

fn persist(history: Option<&SessionHistory>, turn: &ConversationTurn) {
    if let Some(h) = history {
        if let Err(e) = h.append(turn) {
            tracing::warn!(error = %e, "failed to persist history entry");
        }
    }
}
