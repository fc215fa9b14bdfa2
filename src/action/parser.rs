//! Turns raw model text into typed device actions.
//!
//! Expected response shape:
//!
//! ```text
//! Thought: the settings icon is on the home screen
//! Action: click(start_box='[500,500,600,600]')
//! ```
//!
//! Parsing never fails as a whole: a response without an `Action:` section
//! yields no actions, and a single malformed invocation is dropped on its own.
use std::sync::OnceLock;

use regex::Regex;

use crate::action::types::{ParsedAction, Prediction, ScreenPoint, ScrollDirection};
use crate::config::default_factors;
use crate::errors::{PilotError, PilotResult};
use crate::executor::coordinator::map_box;
use crate::perception::types::ScreenshotContext;

#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub screen: ScreenshotContext,
    /// `[width, height]` of the model's quantized coordinate space.
    pub factors: [f64; 2],
}

impl ParseContext {
    pub fn new(screen: ScreenshotContext) -> Self {
        Self {
            screen,
            factors: default_factors(),
        }
    }

    pub fn with_factors(mut self, factors: [f64; 2]) -> Self {
        self.factors = factors;
        self
    }
}

/// One `name(key='value', ...)` invocation before typing.
#[derive(Debug, Clone, PartialEq)]
struct RawCall {
    name: String,
    args: Vec<(String, String)>,
}

impl RawCall {
    fn arg(&self, keys: &[&str]) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| keys.contains(&k.as_str()))
            .map(|(_, v)| v.as_str())
    }
}

fn action_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)(?:^|[ \t])Action[ \t]*:").expect("static regex"))
}

fn section_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(Thought|Reflection|Action_Summary)[ \t]*:[ \t]*").expect("static regex")
    })
}

pub fn parse(text: &str, ctx: &ParseContext) -> Vec<ParsedAction> {
    parse_prediction(text, ctx).actions
}

pub fn parse_prediction(text: &str, ctx: &ParseContext) -> Prediction {
    let text = text.trim();
    let Some(header) = action_header_re().find(text) else {
        tracing::debug!("prediction has no Action section");
        return Prediction {
            thought: clean_thought(text),
            actions: Vec::new(),
        };
    };

    let thought = clean_thought(&text[..header.start()]);
    let section = &text[header.end()..];

    let mut actions = Vec::new();
    for call in split_invocations(section) {
        match to_action(&call, ctx) {
            Ok(action) => actions.push(action),
            Err(e) => {
                tracing::warn!(action = %call.name, error = %e, "dropping malformed action");
            }
        }
    }

    tracing::debug!(count = actions.len(), "prediction parsed");
    Prediction { thought, actions }
}

fn clean_thought(raw: &str) -> String {
    section_label_re().replace_all(raw, "").trim().to_string()
}

/// Scans the action section for `identifier(...)` invocations.
/// Words that are not followed by `(` are treated as prose and skipped.
fn split_invocations(section: &str) -> Vec<RawCall> {
    let chars: Vec<char> = section.chars().collect();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !(chars[i].is_ascii_alphabetic() || chars[i] == '_') {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
            i += 1;
        }
        let name: String = chars[start..i].iter().collect();

        let mut j = i;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        if j >= chars.len() || chars[j] != '(' {
            continue;
        }

        match parse_args(&chars, j + 1) {
            Ok((args, end)) => {
                calls.push(RawCall { name, args });
                i = end;
            }
            Err(e) => {
                tracing::warn!(action = %name, error = %e, "skipping unparsable invocation");
                i = j + 1;
            }
        }
    }
    calls
}

/// Parses `key='v', key2="w"` starting right after `(`.
/// Returns the arguments and the index just past the closing `)`.
fn parse_args(chars: &[char], mut i: usize) -> PilotResult<(Vec<(String, String)>, usize)> {
    let mut args = Vec::new();
    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            return Err(PilotError::Parse("unterminated argument list".into()));
        }
        if chars[i] == ')' {
            return Ok((args, i + 1));
        }

        let key_start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect();
        if key.is_empty() {
            return Err(PilotError::Parse(format!("unexpected `{}` in arguments", chars[i])));
        }
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() || chars[i] != '=' {
            return Err(PilotError::Parse(format!("argument `{key}` has no value")));
        }
        i += 1;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            return Err(PilotError::Parse("unterminated argument list".into()));
        }

        let value = if chars[i] == '\'' || chars[i] == '"' {
            let quote = chars[i];
            i += 1;
            let mut value = String::new();
            loop {
                let Some(&c) = chars.get(i) else {
                    return Err(PilotError::Parse(format!("unterminated string for `{key}`")));
                };
                if c == '\\' {
                    match chars.get(i + 1) {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(&e) if e == quote || e == '\\' => value.push(e),
                        Some(&e) => {
                            value.push('\\');
                            value.push(e);
                        }
                        None => value.push('\\'),
                    }
                    i += 2;
                    continue;
                }
                i += 1;
                if c == quote {
                    break;
                }
                value.push(c);
            }
            value
        } else {
            let v_start = i;
            while i < chars.len() && chars[i] != ',' && chars[i] != ')' {
                i += 1;
            }
            chars[v_start..i].iter().collect::<String>().trim().to_string()
        };
        args.push((key, value));
    }
}

fn require<'a>(call: &'a RawCall, keys: &[&str]) -> PilotResult<&'a str> {
    call.arg(keys)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PilotError::Parse(format!("`{}` requires `{}`", call.name, keys[0])))
}

fn point(call: &RawCall, keys: &[&str], ctx: &ParseContext) -> PilotResult<ScreenPoint> {
    map_box(require(call, keys)?, ctx.factors, &ctx.screen)
}

const START_KEYS: &[&str] = &["start_box", "start_point", "point"];
const END_KEYS: &[&str] = &["end_box", "end_point"];

fn to_action(call: &RawCall, ctx: &ParseContext) -> PilotResult<ParsedAction> {
    let action = match call.name.to_lowercase().as_str() {
        "click" | "left_single" => ParsedAction::Click {
            point: point(call, START_KEYS, ctx)?,
        },
        "left_double" | "double_click" => ParsedAction::DoubleClick {
            point: point(call, START_KEYS, ctx)?,
        },
        "right_single" | "right_click" => ParsedAction::RightClick {
            point: point(call, START_KEYS, ctx)?,
        },
        "drag" | "swipe" | "select" => ParsedAction::Drag {
            start: point(call, START_KEYS, ctx)?,
            end: point(call, END_KEYS, ctx)?,
        },
        "type" => ParsedAction::Type {
            content: call.arg(&["content"]).unwrap_or_default().to_string(),
        },
        "hotkey" => ParsedAction::Hotkey {
            key: require(call, &["key", "hotkey"])?.trim().to_string(),
        },
        "scroll" => {
            let direction = require(call, &["direction"])?
                .parse::<ScrollDirection>()
                .map_err(PilotError::Parse)?;
            let point = match call.arg(START_KEYS) {
                Some(b) if !b.trim().is_empty() => Some(map_box(b, ctx.factors, &ctx.screen)?),
                _ => None,
            };
            ParsedAction::Scroll { point, direction }
        }
        "wait" => ParsedAction::Wait,
        "open_app" => ParsedAction::OpenApp {
            package_name: require(call, &["package_name", "app_name"])?.trim().to_string(),
        },
        "press_home" => ParsedAction::PressKey { key: "home".into() },
        "press_back" => ParsedAction::PressKey { key: "back".into() },
        "press" | "press_key" => ParsedAction::PressKey {
            key: require(call, &["key"])?.trim().to_lowercase(),
        },
        "finished" => ParsedAction::Finished {
            content: call.arg(&["content"]).map(str::to_string),
        },
        "call_user" => ParsedAction::CallUser,
        "error_env" | "error" => ParsedAction::Error {
            message: call
                .arg(&["content", "message", "reason"])
                .unwrap_or("model reported an unrecoverable environment error")
                .to_string(),
        },
        _ => ParsedAction::Unsupported {
            name: call.name.clone(),
        },
    };
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone() -> ParseContext {
        ParseContext::new(ScreenshotContext::new(1080, 2400, 1.0))
    }

    #[test]
    fn test_open_app_scenario() {
        let text = "Thought: I should open settings.\nAction: open_app(package_name='com.settings')";
        let p = parse_prediction(text, &phone());
        assert_eq!(p.thought, "I should open settings.");
        assert_eq!(
            p.actions,
            vec![ParsedAction::OpenApp {
                package_name: "com.settings".into()
            }]
        );
    }

    #[test]
    fn test_action_header_mid_line() {
        let p = parse_prediction(
            "Thought: open it. Action: open_app(package_name='com.settings')",
            &phone(),
        );
        assert_eq!(p.thought, "open it.");
        assert_eq!(
            p.actions,
            vec![ParsedAction::OpenApp {
                package_name: "com.settings".into()
            }]
        );

        let p = parse_prediction("Action_Summary: tap it Action: press_home()", &phone());
        assert_eq!(p.actions, vec![ParsedAction::PressKey { key: "home".into() }]);
    }

    #[test]
    fn test_click_maps_coordinates() {
        let actions = parse("Action: click(start_box='[500,500,600,600]')", &phone());
        assert_eq!(
            actions,
            vec![ParsedAction::Click {
                point: ScreenPoint::new(594, 1320)
            }]
        );
    }

    #[test]
    fn test_no_action_section_is_empty() {
        assert!(parse("I am not sure what to do here.", &phone()).is_empty());
        assert!(parse("", &phone()).is_empty());
        assert!(parse("Thought: hmm\nAction:", &phone()).is_empty());
        assert!(parse("Action: click(start_box='[1,2,3,4]'", &phone()).is_empty());
    }

    #[test]
    fn test_multiple_actions_in_source_order() {
        let text = "Thought: fill the form\nAction: click(start_box='[100,100,100,100]')\n\n\
                    type(content='hello')\n\nhotkey(key='enter')";
        let actions = parse(text, &phone());
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].action_type(), "click");
        assert_eq!(actions[1], ParsedAction::Type { content: "hello".into() });
        assert_eq!(actions[2], ParsedAction::Hotkey { key: "enter".into() });
    }

    #[test]
    fn test_scroll_without_direction_drops_only_that_action() {
        let text = "Action: scroll(start_box='[10,10,10,10]')\n\nwait()";
        assert_eq!(parse(text, &phone()), vec![ParsedAction::Wait]);
    }

    #[test]
    fn test_escapes_and_quotes_in_content() {
        let text = r#"Action: type(content='it\'s done\n')"#;
        assert_eq!(
            parse(text, &phone()),
            vec![ParsedAction::Type {
                content: "it's done\n".into()
            }]
        );
        let text = r#"Action: type(content="say \"hi\", then (wave)")"#;
        assert_eq!(
            parse(text, &phone()),
            vec![ParsedAction::Type {
                content: "say \"hi\", then (wave)".into()
            }]
        );
    }

    #[test]
    fn test_aliases_and_terminal_actions() {
        let text = "Reflection: ok\nAction_Summary: wrap up\nAction: left_double(start_box='(0,0)')\n\
                    right_single(start_box='(1000,1000)')\npress_home()\nfinished(content='done')";
        let actions = parse(text, &phone());
        assert_eq!(
            actions,
            vec![
                ParsedAction::DoubleClick { point: ScreenPoint::new(0, 0) },
                ParsedAction::RightClick { point: ScreenPoint::new(1080, 2400) },
                ParsedAction::PressKey { key: "home".into() },
                ParsedAction::Finished { content: Some("done".into()) },
            ]
        );
    }

    #[test]
    fn test_swipe_is_drag_and_unknown_is_unsupported() {
        let text = "Action: swipe(start_box='[0,0,0,0]', end_box='[1000,1000,1000,1000]')\n\nlong_press(start_box='(5,5)')";
        let actions = parse(text, &phone());
        assert_eq!(
            actions[0],
            ParsedAction::Drag {
                start: ScreenPoint::new(0, 0),
                end: ScreenPoint::new(1080, 2400)
            }
        );
        assert_eq!(actions[1], ParsedAction::Unsupported { name: "long_press".into() });
    }

    #[test]
    fn test_thought_strips_labels() {
        let p = parse_prediction("Thought: first\nline two\nAction: call_user()", &phone());
        assert_eq!(p.thought, "first\nline two");
        assert_eq!(p.actions, vec![ParsedAction::CallUser]);
    }
}
