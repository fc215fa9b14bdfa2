use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

pub const API_KEY_ENV: &str = "GUI_PILOT_VLM_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub vlm: VlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub adb: AdbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlmConfig {
    /// Full chat-completions endpoint of an OpenAI-compatible server.
    pub api_base: String,
    pub model: String,
    /// Falls back to the `GUI_PILOT_VLM_API_KEY` environment variable when empty.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Quantization space of the model's box coordinates: `[width, height]`.
    #[serde(default = "default_factors")]
    pub factors: [f64; 2],
}

impl VlmConfig {
    pub fn resolved_api_key(&self) -> String {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.api_key.clone().unwrap_or_default())
    }
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_top_p() -> f64 {
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

pub fn default_factors() -> [f64; 2] {
    [1000.0, 1000.0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    #[default]
    Desktop,
    Adb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    Zh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub operator: OperatorKind,
    #[serde(default)]
    pub language: Language,
    #[serde(default = "default_max_loop_count")]
    pub max_loop_count: u32,
    /// Pause between rounds, in milliseconds.
    #[serde(default)]
    pub loop_interval_ms: u64,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_max_history_images")]
    pub max_history_images: usize,
    /// Attach a Set-of-Marks image of each prediction to the agent turn.
    #[serde(default)]
    pub mark_predictions: bool,
    #[serde(default = "default_true")]
    pub persist_history: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            operator: OperatorKind::default(),
            language: Language::default(),
            max_loop_count: default_max_loop_count(),
            loop_interval_ms: 0,
            max_history_turns: default_max_history_turns(),
            max_history_images: default_max_history_images(),
            mark_predictions: false,
            persist_history: true,
        }
    }
}

impl AgentConfig {
    /// Every round must run and must send its fresh screenshot.
    pub fn validate(&self) -> PilotResult<()> {
        let limits = [
            ("max_loop_count", self.max_loop_count as usize),
            ("max_history_turns", self.max_history_turns),
            ("max_history_images", self.max_history_images),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(PilotError::Config(format!("agent.{name} must be at least 1")));
            }
        }
        Ok(())
    }
}

fn default_max_loop_count() -> u32 {
    25
}

fn default_max_history_turns() -> usize {
    10
}

fn default_max_history_images() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// Retries allowed after the first attempt, per phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_model_retries")]
    pub model: u32,
    #[serde(default = "default_screenshot_retries")]
    pub screenshot: u32,
    #[serde(default = "default_execute_retries")]
    pub execute: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            model: default_model_retries(),
            screenshot: default_screenshot_retries(),
            execute: default_execute_retries(),
        }
    }
}

fn default_model_retries() -> u32 {
    3
}

fn default_screenshot_retries() -> u32 {
    5
}

fn default_execute_retries() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbConfig {
    /// Empty means "discover with `adb devices`".
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_screencap_timeout")]
    pub screencap_timeout_ms: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            command_timeout_ms: default_command_timeout(),
            screencap_timeout_ms: default_screencap_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    3000
}

fn default_screencap_timeout() -> u64 {
    5000
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> PilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.agent.validate()?;
    tracing::info!(
        path = %path.display(),
        model = %config.vlm.model,
        operator = ?config.agent.operator,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(path: &Path, config: &AppConfig) -> PilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
