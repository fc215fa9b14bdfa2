use crate::config::Language;

fn language_name(language: Language) -> &'static str {
    match language {
        Language::En => "English",
        Language::Zh => "Chinese",
    }
}

/// System prompt for the action loop. `manifest` is the operator's action
/// space, one signature per line.
pub fn system_prompt(manifest: &str, language: Language) -> String {
    format!(
        "You are a GUI agent. You are given a task and your action history, with screenshots. \
You need to perform the next action to complete the task.

## Output Format
```
Thought: ...
Action: ...
```

## Action Space
{manifest}

## Note
- Use {lang} in `Thought` part.
- Write a small plan and finally summarize your next action (with its target element) in one sentence in `Thought` part.
- Click an input box before typing into it.
- Never submit payment orders.
- When the task is complete, call finished().

## User Instruction
",
        lang = language_name(language)
    )
}

/// System prompt asking for `{"steps": [...]}`.
pub fn planning_prompt(language: Language) -> String {
    format!(
        "You are a task planning assistant. Break the user's instruction into a short list of \
specific, actionable GUI steps.

Reply with JSON only, in this shape:
{{
  \"steps\": [
    \"Open the app\",
    \"Navigate to the search page\",
    \"Enter the search query\"
  ]
}}

## Notes
- Use {lang} for the step descriptions.
- One action per step; include navigation between screens.
- For input or selection steps, say exactly what to enter or select.
",
        lang = language_name(language)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_embeds_manifest_and_language() {
        let p = system_prompt("click(start_box='[x1, y1, x2, y2]')\nfinished()", Language::Zh);
        assert!(p.contains("## Action Space\nclick(start_box='[x1, y1, x2, y2]')\nfinished()\n"));
        assert!(p.contains("Use Chinese in `Thought` part."));
        assert!(p.ends_with("## User Instruction\n"));
    }

    #[test]
    fn test_planning_prompt_shape() {
        let p = planning_prompt(Language::En);
        assert!(p.contains("\"steps\": ["));
        assert!(p.contains("Use English"));
    }
}
