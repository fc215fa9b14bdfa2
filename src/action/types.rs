use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Absolute device coordinate in the frame of the round's screenshot,
/// already expressed in the space the operator injects input in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

impl ScreenPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ScreenPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(format!("unknown scroll direction `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedAction {
    Click { point: ScreenPoint },
    DoubleClick { point: ScreenPoint },
    RightClick { point: ScreenPoint },
    Drag { start: ScreenPoint, end: ScreenPoint },
    Type { content: String },
    Hotkey { key: String },
    Scroll {
        point: Option<ScreenPoint>,
        direction: ScrollDirection,
    },
    Wait,
    OpenApp { package_name: String },
    PressKey { key: String },
    Finished { content: Option<String> },
    CallUser,
    Error { message: String },
    /// An action name outside the known vocabulary; operators ignore it.
    Unsupported { name: String },
}

impl ParsedAction {
    pub fn action_type(&self) -> &str {
        match self {
            ParsedAction::Click { .. } => "click",
            ParsedAction::DoubleClick { .. } => "double_click",
            ParsedAction::RightClick { .. } => "right_click",
            ParsedAction::Drag { .. } => "drag",
            ParsedAction::Type { .. } => "type",
            ParsedAction::Hotkey { .. } => "hotkey",
            ParsedAction::Scroll { .. } => "scroll",
            ParsedAction::Wait => "wait",
            ParsedAction::OpenApp { .. } => "open_app",
            ParsedAction::PressKey { .. } => "press_key",
            ParsedAction::Finished { .. } => "finished",
            ParsedAction::CallUser => "call_user",
            ParsedAction::Error { .. } => "error",
            ParsedAction::Unsupported { name } => name,
        }
    }

    /// Points the action targets, for marking on the screenshot.
    pub fn points(&self) -> Vec<ScreenPoint> {
        match self {
            ParsedAction::Click { point }
            | ParsedAction::DoubleClick { point }
            | ParsedAction::RightClick { point } => vec![*point],
            ParsedAction::Drag { start, end } => vec![*start, *end],
            ParsedAction::Scroll { point: Some(p), .. } => vec![*p],
            _ => Vec::new(),
        }
    }
}

/// A parsed model response: the free-form reasoning plus the actions in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub thought: String,
    pub actions: Vec<ParsedAction>,
}
