use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Content(String),
    Done,
}

/// Parses a raw SSE line (OpenAI-compatible format).
/// Returns None if the line is a keep-alive, a non-data line or an empty delta.
pub fn parse_sse_line(line: &str) -> PilotResult<Option<SseEvent>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();

    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| PilotError::Transport(format!("bad SSE chunk: {e}")))?;

    if let Some(message) = json["error"]["message"].as_str() {
        return Err(PilotError::Transport(message.to_string()));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };

    if let Some(content) = first["delta"]["content"].as_str() {
        if !content.is_empty() {
            return Ok(Some(SseEvent::Content(content.to_string())));
        }
    }

    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(SseEvent::Done));
    }

    Ok(None)
}

/// Splits a byte stream into complete lines. Bytes after the last newline
/// are held back, so a multi-byte character cut across two network chunks
/// is decoded whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(last_nl) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_nl).collect();
        complete
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// The unterminated tail, if the stream ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}
