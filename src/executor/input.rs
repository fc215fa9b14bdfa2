// Physical input simulation through enigo. Every call runs on a blocking thread
// with its own Enigo connection.
use std::thread;
use std::time::Duration;

use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::action::types::{ScreenPoint, ScrollDirection};
use crate::errors::{PilotError, PilotResult};

/// Wheel notches per scroll action.
const SCROLL_NOTCHES: i32 = 5;
const STEP_PAUSE: Duration = Duration::from_millis(50);

pub(crate) fn input_err<E: std::fmt::Debug>(e: E) -> String {
    format!("{e:?}")
}

pub(crate) async fn with_enigo<F>(action: &'static str, f: F) -> PilotResult<()>
where
    F: FnOnce(&mut Enigo) -> Result<(), String> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| format!("input backend unavailable: {e}"))?;
        f(&mut enigo)
    })
    .await
    .map_err(|e| PilotError::execution(action, format!("input thread failed: {e}")))?
    .map_err(|message| PilotError::execution(action, message))
}

fn move_to(enigo: &mut Enigo, p: ScreenPoint) -> Result<(), String> {
    enigo.move_mouse(p.x, p.y, Coordinate::Abs).map_err(input_err)
}

pub async fn mouse_click(p: ScreenPoint) -> PilotResult<()> {
    with_enigo("click", move |enigo| {
        move_to(enigo, p)?;
        enigo.button(Button::Left, Direction::Click).map_err(input_err)
    })
    .await
}

pub async fn mouse_double_click(p: ScreenPoint) -> PilotResult<()> {
    with_enigo("double_click", move |enigo| {
        move_to(enigo, p)?;
        enigo.button(Button::Left, Direction::Click).map_err(input_err)?;
        thread::sleep(STEP_PAUSE);
        enigo.button(Button::Left, Direction::Click).map_err(input_err)
    })
    .await
}

pub async fn mouse_right_click(p: ScreenPoint) -> PilotResult<()> {
    with_enigo("right_click", move |enigo| {
        move_to(enigo, p)?;
        enigo.button(Button::Right, Direction::Click).map_err(input_err)
    })
    .await
}

pub async fn mouse_drag(from: ScreenPoint, to: ScreenPoint) -> PilotResult<()> {
    with_enigo("drag", move |enigo| {
        move_to(enigo, from)?;
        enigo.button(Button::Left, Direction::Press).map_err(input_err)?;
        thread::sleep(STEP_PAUSE);
        move_to(enigo, to)?;
        thread::sleep(STEP_PAUSE);
        enigo.button(Button::Left, Direction::Release).map_err(input_err)
    })
    .await
}

pub async fn scroll(at: Option<ScreenPoint>, direction: ScrollDirection) -> PilotResult<()> {
    with_enigo("scroll", move |enigo| {
        if let Some(p) = at {
            move_to(enigo, p)?;
        }
        let (length, axis) = match direction {
            ScrollDirection::Up => (-SCROLL_NOTCHES, Axis::Vertical),
            ScrollDirection::Down => (SCROLL_NOTCHES, Axis::Vertical),
            ScrollDirection::Left => (-SCROLL_NOTCHES, Axis::Horizontal),
            ScrollDirection::Right => (SCROLL_NOTCHES, Axis::Horizontal),
        };
        enigo.scroll(length, axis).map_err(input_err)
    })
    .await
}

/// Types `text` with per-character key events.
pub async fn type_text(text: String) -> PilotResult<()> {
    with_enigo("type", move |enigo| enigo.text(&text).map_err(input_err)).await
}

pub async fn press_enter() -> PilotResult<()> {
    with_enigo("type", |enigo| enigo.key(Key::Return, Direction::Click).map_err(input_err)).await
}

/// Presses a chord such as `ctrl c` or `ctrl+shift+t`: keys go down in order
/// and come up in reverse.
pub async fn press_hotkey(keys: String) -> PilotResult<()> {
    let parsed = parse_hotkey(&keys).map_err(|m| PilotError::execution("hotkey", m))?;
    with_enigo("hotkey", move |enigo| {
        for k in &parsed {
            enigo.key(*k, Direction::Press).map_err(input_err)?;
        }
        thread::sleep(STEP_PAUSE);
        for k in parsed.iter().rev() {
            enigo.key(*k, Direction::Release).map_err(input_err)?;
        }
        Ok(())
    })
    .await
}

pub fn parse_hotkey(keys: &str) -> Result<Vec<Key>, String> {
    let parsed = keys
        .split(|c: char| c.is_whitespace() || c == '+')
        .filter(|s| !s.is_empty())
        .map(map_key)
        .collect::<Result<Vec<_>, _>>()?;
    if parsed.is_empty() {
        return Err("empty hotkey".into());
    }
    Ok(parsed)
}

pub fn map_key(key: &str) -> Result<Key, String> {
    let k = match key.to_lowercase().as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "ctrl" | "control" => Key::Control,
        "shift" => Key::Shift,
        "alt" | "option" => Key::Alt,
        "meta" | "cmd" | "command" | "super" | "win" | "windows" => Key::Meta,
        "up" | "arrowup" => Key::UpArrow,
        "down" | "arrowdown" => Key::DownArrow,
        "left" | "arrowleft" => Key::LeftArrow,
        "right" | "arrowright" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return Err(format!("unsupported key `{key}`")),
            }
        }
    };
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hotkey_chords() {
        assert_eq!(parse_hotkey("ctrl c").unwrap(), vec![Key::Control, Key::Unicode('c')]);
        assert_eq!(
            parse_hotkey("Ctrl+Shift+T").unwrap(),
            vec![Key::Control, Key::Shift, Key::Unicode('t')]
        );
        assert_eq!(parse_hotkey("enter").unwrap(), vec![Key::Return]);
    }

    #[test]
    fn test_parse_hotkey_rejects_unknown() {
        assert!(parse_hotkey("hyper").is_err());
        assert!(parse_hotkey("  ").is_err());
    }
}
