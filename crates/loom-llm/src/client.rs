use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::types::{StreamEvent, ToolDefinition};

/// Anything that can open a streaming chat completion. Lets the session
/// actor depend on this instead of the concrete HTTP client, so tests can
/// drive it with a scripted in-process provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream_completion(
        &self,
        messages: &[serde_json::Value],
        tools: &[ToolDefinition],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()>;
}

/// Streaming client for an OpenAI-shaped chat-completions endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl LlmClient {
    /// `api_key` is `None` when `OPENAI_API_KEY` was unset at startup — that
    /// is only a warning at config time (§9A), not a hard failure; it
    /// surfaces as `LlmError::MissingApiKey` the first time a chat actually
    /// sends a message.
    pub fn new(api_key: Option<String>, base_url: String, model: String, request_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    /// Open a streaming completion and forward parsed events to `tx`.
    ///
    /// `messages` are raw JSON chat messages in OpenAI format (plain
    /// `{role, content}` entries, assistant entries carrying `tool_calls`,
    /// and `tool` role entries carrying `tool_call_id`).
    async fn stream_completion(
        &self,
        messages: &[serde_json::Value],
        tools: &[ToolDefinition],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let api_key = self.api_key.as_ref().ok_or(LlmError::MissingApiKey)?;

        let body = build_request_body(&self.model, messages, tools);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %self.model, "sending streaming completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "completions API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        process_stream(resp, tx).await;
        Ok(())
    }
}

fn build_request_body(
    model: &str,
    messages: &[serde_json::Value],
    tools: &[ToolDefinition],
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });

    if !tools.is_empty() {
        let tool_json: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tool_json);
    }

    body
}

/// Parse a chunked SSE response body and emit `StreamEvent`s.
///
/// Buffers partial data, splits on newlines, and keeps any trailing
/// fragment as the seed for the next chunk. Malformed `data:` lines are
/// silently discarded.
async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                line_buf.clear();
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }

            let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(data) else {
                continue;
            };

            for choice in &chunk_resp.choices {
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty()
                        && tx
                            .send(StreamEvent::TextDelta {
                                text: content.clone(),
                            })
                            .await
                            .is_err()
                    {
                        break 'outer;
                    }
                }

                if let Some(tool_calls) = &choice.delta.tool_calls {
                    for tc in tool_calls {
                        let index = tc.index;
                        if let Some(id) = &tc.id {
                            let name = tc
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default();
                            let arguments = tc
                                .function
                                .as_ref()
                                .and_then(|f| f.arguments.clone())
                                .unwrap_or_default();
                            if tx
                                .send(StreamEvent::ToolCallStart {
                                    index,
                                    id: id.clone(),
                                    name,
                                    arguments,
                                })
                                .await
                                .is_err()
                            {
                                break 'outer;
                            }
                        } else if let Some(delta) =
                            tc.function.as_ref().and_then(|f| f.arguments.clone())
                        {
                            if tx
                                .send(StreamEvent::ToolCallDelta { index, delta })
                                .await
                                .is_err()
                            {
                                break 'outer;
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx.send(StreamEvent::Done).await;
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_includes_tools_and_stream_flag() {
        let tools = vec![ToolDefinition {
            name: "execute_command".into(),
            description: "run a shell command".into(),
            parameters: serde_json::json!({"type":"object"}),
        }];
        let messages = vec![serde_json::json!({"role":"user","content":"hi"})];
        let body = build_request_body("gpt-4o-mini", &messages, &tools);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "execute_command");
    }

    #[test]
    fn request_body_omits_tools_when_empty() {
        let messages = vec![serde_json::json!({"role":"user","content":"hi"})];
        let body = build_request_body("gpt-4o-mini", &messages, &[]);
        assert!(body.get("tools").is_none());
    }
}
