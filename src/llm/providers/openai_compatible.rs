use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::VlmConfig;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::VlmModel;
use crate::llm::sse_parser::{self, LineBuffer, SseEvent};
use crate::llm::types::{CallConfig, ChatMessage, InvokeOutput};

pub struct OpenAiCompatibleModel {
    api_base: String,
    api_key: String,
    cfg: CallConfig,
    factors: [f64; 2],
    client: reqwest::Client,
}

impl OpenAiCompatibleModel {
    pub fn from_config(vlm: &VlmConfig) -> PilotResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(vlm.request_timeout_secs))
            .build()?;
        Ok(Self {
            api_base: vlm.api_base.clone(),
            api_key: vlm.resolved_api_key(),
            cfg: CallConfig {
                model: vlm.model.clone(),
                max_tokens: vlm.max_tokens,
                temperature: vlm.temperature,
                top_p: vlm.top_p,
                stream: vlm.stream,
            },
            factors: vlm.factors,
            client,
        })
    }

    async fn chat(&self, messages: &[ChatMessage], stream: bool) -> PilotResult<String> {
        let body = build_body(&self.cfg, messages, stream);

        tracing::debug!(
            model = %self.cfg.model,
            stream,
            messages = messages.len(),
            "sending VLM request"
        );
        tracing::trace!(body = %sanitized(&body), "request body (base64 omitted)");

        let mut request = self.client.post(&self.api_base).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| PilotError::Transport(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Transport(format!("{status}: {err_body}")));
        }

        let content = if stream {
            self.handle_stream(response).await?
        } else {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PilotError::Transport(format!("bad response body: {e}")))?;
            extract_content(&json)?
        };

        if content.trim().is_empty() {
            return Err(PilotError::Transport("model returned an empty prediction".into()));
        }
        Ok(content)
    }

    /// Accumulates the streamed content deltas into the full prediction.
    async fn handle_stream(&self, response: reqwest::Response) -> PilotResult<String> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut content = String::new();
        let mut done = false;

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result.map_err(|e| PilotError::Transport(format!("stream interrupted: {e}")))?;
            for line in lines.push(&bytes) {
                if !apply_sse_line(&line, &mut content)? {
                    done = true;
                    break 'stream;
                }
            }
        }
        if let Some(tail) = lines.finish().filter(|_| !done) {
            apply_sse_line(&tail, &mut content)?;
        }

        tracing::info!(content_len = content.len(), "VLM stream complete");
        Ok(content)
    }
}

#[async_trait]
impl VlmModel for OpenAiCompatibleModel {
    async fn invoke(&self, messages: Vec<ChatMessage>) -> PilotResult<InvokeOutput> {
        let started = Instant::now();
        let prediction = self.chat(&messages, self.cfg.stream).await?;
        let cost_ms = started.elapsed().as_millis() as u64;
        tracing::info!(cost_ms, len = prediction.len(), "VLM prediction received");
        Ok(InvokeOutput { prediction, cost_ms })
    }

    async fn invoke_text_only(&self, system: &str, user: &str) -> PilotResult<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        self.chat(&messages, false).await
    }

    fn factors(&self) -> [f64; 2] {
        self.factors
    }
}

/// Folds one SSE line into `content`. Returns false once the stream is done.
fn apply_sse_line(line: &str, content: &mut String) -> PilotResult<bool> {
    match sse_parser::parse_sse_line(line) {
        Ok(Some(SseEvent::Content(delta))) => content.push_str(&delta),
        Ok(Some(SseEvent::Done)) => return Ok(false),
        Ok(None) => {}
        Err(e @ PilotError::Transport(_)) if line.contains("\"error\"") => return Err(e),
        Err(e) => tracing::debug!("SSE parse skipped: {e}"),
    }
    Ok(true)
}

fn build_body(cfg: &CallConfig, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": cfg.model,
        "messages": messages,
        "stream": stream,
        "max_tokens": cfg.max_tokens,
        "temperature": cfg.temperature,
        "top_p": cfg.top_p,
    })
}

fn extract_content(json: &serde_json::Value) -> PilotResult<String> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(PilotError::Transport(message.to_string()));
    }
    Ok(json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string())
}

/// Copy of the request body with inline images replaced, for logging.
fn sanitized(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.pointer_mut("/image_url/url") {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CallConfig {
        CallConfig {
            model: "ui-tars".into(),
            max_tokens: 1000,
            temperature: 0.0,
            top_p: 0.7,
            stream: false,
        }
    }

    #[test]
    fn test_body_serializes_image_parts() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user_image("data:image/png;base64,AAAA".into()),
        ];
        let body = build_body(&cfg(), &messages, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(body["messages"][1]["content"][0]["type"], "image_url");
        assert_eq!(
            body["messages"][1]["content"][0]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_sanitized_body_drops_base64() {
        let messages = vec![ChatMessage::user_image("data:image/png;base64,SECRET".into())];
        let text = sanitized(&build_body(&cfg(), &messages, false));
        assert!(!text.contains("SECRET"));
        assert!(text.contains("<omitted_base64_image>"));
    }

    #[test]
    fn test_stream_chunks_split_mid_character() {
        let stream = "data: {\"choices\":[{\"delta\":{\"content\":\"Thought: 打开设置\"}}]}\n\ndata: [DONE]\n";
        let bytes = stream.as_bytes();
        let cut = bytes.iter().position(|&b| b >= 0x80).unwrap() + 2;

        let mut lines = LineBuffer::default();
        let mut content = String::new();
        for chunk in [&bytes[..cut], &bytes[cut..]] {
            for line in lines.push(chunk) {
                if !apply_sse_line(&line, &mut content).unwrap() {
                    break;
                }
            }
        }
        assert_eq!(content, "Thought: 打开设置");
    }

    #[test]
    fn test_stream_error_payload_fails() {
        let mut content = String::new();
        let err = apply_sse_line(r#"data: {"error":{"message":"overloaded"}}"#, &mut content);
        assert!(matches!(err, Err(PilotError::Transport(_))));
        assert!(apply_sse_line("data: {broken", &mut content).unwrap());
    }

    #[test]
    fn test_extract_content() {
        let ok = serde_json::json!({"choices":[{"message":{"content":"Action: wait()"}}]});
        assert_eq!(extract_content(&ok).unwrap(), "Action: wait()");
        let missing = serde_json::json!({"choices":[]});
        assert_eq!(extract_content(&missing).unwrap(), "");
        let err = serde_json::json!({"error":{"message":"bad key"}});
        assert!(matches!(extract_content(&err), Err(PilotError::Transport(_))));
    }
}
