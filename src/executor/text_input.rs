// CJK-aware text input.
// CJK text (and all text on Windows) goes via clipboard + paste; Latin via direct key simulation.
use std::thread;
use std::time::Duration;

use enigo::{Direction, Key, Keyboard};

use crate::errors::PilotResult;
use crate::executor::input::{self, input_err, with_enigo};

/// Returns true if the text contains CJK (Chinese/Japanese/Korean) characters.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        ('\u{4e00}'..='\u{9fff}').contains(&c)
            || ('\u{3040}'..='\u{309f}').contains(&c)
            || ('\u{30a0}'..='\u{30ff}').contains(&c)
            || ('\u{ac00}'..='\u{d7af}').contains(&c)
    })
}

pub fn should_paste(text: &str) -> bool {
    cfg!(target_os = "windows") || contains_cjk(text)
}

/// Splits a trailing submit marker (a real newline or a literal `\n`) off the text.
pub fn strip_submit(text: &str) -> (&str, bool) {
    if let Some(rest) = text.strip_suffix("\\n") {
        (rest, true)
    } else if let Some(rest) = text.strip_suffix('\n') {
        (rest, true)
    } else {
        (text, false)
    }
}

/// The text to type and whether Enter follows. A bare `\n` is a submit alone.
pub fn split_input(content: &str) -> (&str, bool) {
    let (text, submit) = strip_submit(content.trim_end_matches([' ', '\t', '\r']));
    (text.trim_start(), submit)
}

/// True when `content` would neither type anything nor submit.
pub fn is_noop(content: &str) -> bool {
    let (text, submit) = split_input(content);
    text.trim().is_empty() && !submit
}

/// Types `content`, pressing Enter afterwards when it ends with a submit marker.
pub async fn enter_text(content: &str) -> PilotResult<()> {
    let (text, submit) = split_input(content);
    if !text.trim().is_empty() {
        if should_paste(text) {
            paste_text(text.to_string()).await?;
        } else {
            input::type_text(text.to_string()).await?;
        }
    }
    if submit {
        input::press_enter().await?;
    }
    Ok(())
}

/// Pastes through the clipboard and restores the previous clipboard text afterwards.
pub async fn paste_text(text: String) -> PilotResult<()> {
    with_enigo("type", move |enigo| {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| format!("clipboard unavailable: {e}"))?;
        let previous = clipboard.get_text().ok();
        clipboard
            .set_text(text)
            .map_err(|e| format!("clipboard write failed: {e}"))?;

        let modifier = if cfg!(target_os = "macos") { Key::Meta } else { Key::Control };
        let pasted = (|| {
            enigo.key(modifier, Direction::Press).map_err(input_err)?;
            enigo.key(Key::Unicode('v'), Direction::Click).map_err(input_err)?;
            thread::sleep(Duration::from_millis(50));
            enigo.key(modifier, Direction::Release).map_err(input_err)
        })();
        thread::sleep(Duration::from_millis(50));

        let restored = match previous {
            Some(prev) => clipboard.set_text(prev),
            None => clipboard.clear(),
        };
        if let Err(e) = restored {
            tracing::warn!(error = %e, "failed to restore clipboard");
        }
        pasted
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("搜索北京"));
        assert!(contains_cjk("abc カタカナ"));
        assert!(contains_cjk("안녕"));
        assert!(!contains_cjk("hello, world"));
    }

    #[test]
    fn test_strip_submit() {
        assert_eq!(strip_submit("search\n"), ("search", true));
        assert_eq!(strip_submit("search\\n"), ("search", true));
        assert_eq!(strip_submit("search"), ("search", false));
    }

    #[test]
    fn test_bare_newline_submits() {
        assert_eq!(split_input("\n"), ("", true));
        assert_eq!(split_input("\\n"), ("", true));
        assert_eq!(split_input("  query \n"), ("query ", true));
        assert!(!is_noop("\n"));
        assert!(!is_noop("\\n"));
        assert!(is_noop("   "));
        assert!(is_noop(""));
    }
}
