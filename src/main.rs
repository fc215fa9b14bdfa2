//! Headless runner: drives one instruction to completion and exits with a
//! code reflecting how the run ended.
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use gui_pilot::agent_engine::engine::AgentEngine;
use gui_pilot::agent_engine::event_bus::ChannelObserver;
use gui_pilot::agent_engine::planner::{plan_steps, with_plan};
use gui_pilot::agent_engine::state::{AgentEvent, RoundState, RunStatus};
use gui_pilot::config::{self, AppConfig, OperatorKind};
use gui_pilot::errors::PilotResult;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OperatorArg {
    Desktop,
    Adb,
}

impl From<OperatorArg> for OperatorKind {
    fn from(arg: OperatorArg) -> Self {
        match arg {
            OperatorArg::Desktop => OperatorKind::Desktop,
            OperatorArg::Adb => OperatorKind::Adb,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "gui-pilot",
    version,
    about = "Drive a desktop or Android device toward a goal with a vision-language model"
)]
struct Cli {
    /// Path to config.toml (default: next to the executable, then the working directory).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    operator: Option<OperatorArg>,
    /// ADB device serial; overrides `adb.device_id`.
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    max_loops: Option<u32>,
    /// Ask the model for a step plan first and append it to the instruction.
    #[arg(long)]
    plan: bool,
    #[arg(required = true, num_args = 1..)]
    instruction: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    gui_pilot::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(state) => exit_code(&state),
        Err(e) => {
            tracing::error!(error = %e, "gui-pilot failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> PilotResult<RoundState> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    apply_overrides(&mut cfg, &cli);

    let operator = gui_pilot::build_operator(&cfg).await?;
    let model = gui_pilot::build_model(&cfg)?;

    let mut instruction = cli.instruction.join(" ");
    if cli.plan {
        match plan_steps(model.as_ref(), &instruction, cfg.agent.language).await {
            Ok(steps) => instruction = with_plan(&instruction, &steps),
            Err(e) => tracing::warn!(error = %e, "planning failed; running without a plan"),
        }
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping");
            on_ctrl_c.cancel();
        }
    });

    let (observer, mut events) = ChannelObserver::new(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Data { round, status, turns } => {
                    for turn in turns.iter().filter(|t| !t.text.is_empty()) {
                        tracing::info!(round, "{}", turn.text);
                    }
                    tracing::info!(round, status = ?status, "round complete");
                }
                AgentEvent::Error { message } => tracing::error!(%message, "agent error"),
            }
        }
    });

    let engine = AgentEngine::new(operator, model, cfg.agent.clone(), cfg.retry)
        .with_observer(Arc::new(observer));
    let state = engine.run(&instruction, &cancel).await;
    drop(engine);
    let _ = printer.await;

    tracing::info!(status = ?state.status, rounds = state.index, "done");
    Ok(state)
}

fn apply_overrides(cfg: &mut AppConfig, cli: &Cli) {
    if let Some(op) = cli.operator {
        cfg.agent.operator = op.into();
    }
    if let Some(device) = &cli.device {
        cfg.adb.device_id = device.clone();
    }
    if let Some(n) = cli.max_loops {
        cfg.agent.max_loop_count = n.max(1);
    }
}

fn exit_code(state: &RoundState) -> ExitCode {
    match state.status {
        RunStatus::Finished => ExitCode::SUCCESS,
        RunStatus::CallUser => ExitCode::from(2),
        RunStatus::MaxLoopExceeded => ExitCode::from(3),
        RunStatus::UserAborted => ExitCode::from(130),
        RunStatus::Error | RunStatus::Init | RunStatus::Running => ExitCode::FAILURE,
    }
}
