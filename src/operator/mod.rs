//! Device operators: how screenshots are taken and actions are physically
//! executed on a given kind of device.
//!
//! Two implementations share nothing but this trait:
//! - [`desktop::DesktopOperator`]: primary display + OS input injection.
//! - [`adb::AdbOperator`]: Android device driven over `adb`.
pub mod adb;
pub mod desktop;

use async_trait::async_trait;

use crate::action::types::ParsedAction;
use crate::errors::PilotResult;
use crate::perception::types::ScreenshotOutput;

#[async_trait]
pub trait Operator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Action-space manifest injected verbatim into the system prompt.
    /// Argument names must match what [`Operator::execute`] accepts.
    fn action_spaces(&self) -> &'static [&'static str];

    /// Fails with `PilotError::Capture` when the display or device is unreachable.
    async fn screenshot(&self) -> PilotResult<ScreenshotOutput>;

    /// Fails with `PilotError::Execution` when injection fails. Actions the
    /// operator does not support are logged and ignored.
    async fn execute(&self, action: &ParsedAction) -> PilotResult<()>;
}

/// The manifest rendered as the prompt expects it: one signature per line.
pub fn manifest_text(operator: &dyn Operator) -> String {
    operator.action_spaces().join("\n")
}
