pub mod action;
pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod operator;
pub mod perception;

use std::sync::Arc;

use crate::config::{AppConfig, OperatorKind};
use crate::errors::PilotResult;
use crate::llm::provider::VlmModel;
use crate::llm::providers::openai_compatible::OpenAiCompatibleModel;
use crate::operator::adb::AdbOperator;
use crate::operator::desktop::DesktopOperator;
use crate::operator::Operator;

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Builds the operator selected by `agent.operator`. For ADB this resolves
/// the target device, so it may fail when none is attached.
pub async fn build_operator(cfg: &AppConfig) -> PilotResult<Arc<dyn Operator>> {
    match cfg.agent.operator {
        OperatorKind::Desktop => Ok(Arc::new(DesktopOperator::new())),
        OperatorKind::Adb => Ok(Arc::new(AdbOperator::connect(&cfg.adb).await?)),
    }
}

pub fn build_model(cfg: &AppConfig) -> PilotResult<Arc<dyn VlmModel>> {
    Ok(Arc::new(OpenAiCompatibleModel::from_config(&cfg.vlm)?))
}
