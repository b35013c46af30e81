//! Anthropic Messages adapter.
//!
//! Streams a Messages API response and forwards raw fragments: text deltas,
//! tool-use starts, incremental `input_json_delta` text, and the turn end
//! with stop reason and usage. Tool-input reassembly belongs to the
//! orchestration engine, not here — the adapter only maps content-block
//! indices back to the tool-use ids the engine keys on.

use std::collections::HashMap;

use serde_json::Value;

use parley_domain::chat::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use parley_domain::config::ModelConfig;
use parley_domain::stream::{BoxStream, ModelEvent, StopReason, Usage};
use parley_domain::{Error, Result};

use crate::sse::sse_event_stream;
use crate::traits::{ModelClient, ModelRequest};
use crate::from_reqwest;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    model: String,
    default_max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a client from config, reading the API key from the configured
    /// environment variable.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Config(format!("{} is not set", cfg.api_key_env)))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            default_max_tokens: cfg.max_tokens,
            client,
        })
    }

    fn build_body(&self, req: &ModelRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.default_max_tokens),
            "stream": true,
        });

        if !req.system.is_empty() {
            body["system"] = Value::String(req.system.clone());
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_wire(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let content = match &msg.content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Parts(parts) => {
            Value::Array(parts.iter().map(part_to_wire).collect())
        }
    };

    serde_json::json!({ "role": role, "content": content })
}

fn part_to_wire(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({
            "type": "text",
            "text": text,
        }),
        ContentPart::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream parse state: content-block index -> tool-use id, plus usage
/// accumulated across `message_start` / `message_delta`.
struct ParseState {
    tool_ids: HashMap<u64, String>,
    input_tokens: u32,
    output_tokens: u32,
    turn_ended: bool,
}

impl ParseState {
    fn new() -> Self {
        Self {
            tool_ids: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            turn_ended: false,
        }
    }

    fn usage(&self) -> Option<Usage> {
        if self.input_tokens == 0 && self.output_tokens == 0 {
            return None;
        }
        Some(Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        })
    }
}

fn map_stop_reason(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Parse one SSE data payload into zero or more fragment events.
fn parse_sse_payload(data: &str, state: &mut ParseState) -> Vec<Result<ModelEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "message_start" => {
            if let Some(tokens) = v
                .pointer("/message/usage/input_tokens")
                .and_then(|t| t.as_u64())
            {
                state.input_tokens = tokens as u32;
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let id = block
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or("")
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("")
                        .to_string();
                    state.tool_ids.insert(idx, id.clone());
                    events.push(Ok(ModelEvent::ToolUseStart { id, name }));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(ModelEvent::TextDelta {
                                    text: text.to_string(),
                                }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let (Some(partial), Some(id)) = (
                            delta.get("partial_json").and_then(|p| p.as_str()),
                            state.tool_ids.get(&idx),
                        ) {
                            events.push(Ok(ModelEvent::InputJsonDelta {
                                id: id.clone(),
                                partial_json: partial.to_string(),
                            }));
                        }
                    }
                    _ => {}
                }
            }
        }

        "message_delta" => {
            if let Some(out) = v
                .pointer("/usage/output_tokens")
                .and_then(|t| t.as_u64())
            {
                state.output_tokens = out as u32;
            }
            if let Some(stop) = v
                .pointer("/delta/stop_reason")
                .and_then(|s| s.as_str())
            {
                state.turn_ended = true;
                events.push(Ok(ModelEvent::TurnEnd {
                    stop_reason: map_stop_reason(stop),
                    usage: state.usage(),
                }));
            }
        }

        "message_stop" => {
            if !state.turn_ended {
                state.turn_ended = true;
                events.push(Ok(ModelEvent::TurnEnd {
                    stop_reason: StopReason::EndTurn,
                    usage: state.usage(),
                }));
            }
        }

        "error" => {
            let message = v
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown upstream error")
                .to_string();
            events.push(Ok(ModelEvent::Error { message }));
        }

        // ping and unknown event types.
        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelClient for AnthropicClient {
    async fn stream(&self, req: ModelRequest) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req);

        tracing::debug!(model = %self.model, url = %url, "model stream request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Model {
                model: self.model.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut state = ParseState::new();
        Ok(sse_event_stream(resp, move |data| {
            parse_sse_payload(data, &mut state)
        }))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
