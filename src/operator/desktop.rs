use std::time::Duration;

use async_trait::async_trait;

use crate::action::types::ParsedAction;
use crate::errors::PilotResult;
use crate::executor::{input, text_input};
use crate::operator::Operator;
use crate::perception::screenshot::capture_primary;
use crate::perception::types::ScreenshotOutput;

pub const DESKTOP_ACTION_SPACES: &[&str] = &[
    "click(start_box='[x1, y1, x2, y2]')",
    "left_double(start_box='[x1, y1, x2, y2]')",
    "right_single(start_box='[x1, y1, x2, y2]')",
    "drag(start_box='[x1, y1, x2, y2]', end_box='[x3, y3, x4, y4]')",
    "hotkey(key='')",
    "type(content='') #If you want to submit your input, use \"\\n\" at the end of `content`.",
    "scroll(start_box='[x1, y1, x2, y2]', direction='down or up or right or left')",
    "wait() #Sleep for 5s and take a screenshot to check for any changes.",
    "finished()",
    "call_user() # Submit the task and call the user when the task is unsolvable, or when you need the user's help.",
];

const WAIT: Duration = Duration::from_secs(5);

/// Drives the local desktop: captures the primary display and injects
/// mouse/keyboard input. Points arrive in logical display coordinates.
#[derive(Debug, Default)]
pub struct DesktopOperator;

impl DesktopOperator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Operator for DesktopOperator {
    fn name(&self) -> &str {
        "desktop"
    }

    fn action_spaces(&self) -> &'static [&'static str] {
        DESKTOP_ACTION_SPACES
    }

    async fn screenshot(&self) -> PilotResult<ScreenshotOutput> {
        let shot = capture_primary().await?;
        tracing::info!(
            bytes = shot.image_bytes.len(),
            scale = shot.scale_factor,
            "[desktop] screenshot"
        );
        Ok(shot)
    }

    async fn execute(&self, action: &ParsedAction) -> PilotResult<()> {
        tracing::info!(?action, "[desktop] execute");
        match action {
            ParsedAction::Click { point } => input::mouse_click(*point).await,
            ParsedAction::DoubleClick { point } => input::mouse_double_click(*point).await,
            ParsedAction::RightClick { point } => input::mouse_right_click(*point).await,
            ParsedAction::Drag { start, end } => input::mouse_drag(*start, *end).await,
            ParsedAction::Scroll { point, direction } => input::scroll(*point, *direction).await,
            ParsedAction::Type { content } => {
                if text_input::is_noop(content) {
                    tracing::warn!("[desktop] type action without content");
                    return Ok(());
                }
                text_input::enter_text(content).await
            }
            ParsedAction::Hotkey { key } => input::press_hotkey(key.clone()).await,
            ParsedAction::Wait => {
                tokio::time::sleep(WAIT).await;
                Ok(())
            }
            other => {
                tracing::warn!(action = other.action_type(), "[desktop] unsupported action ignored");
                Ok(())
            }
        }
    }
}
