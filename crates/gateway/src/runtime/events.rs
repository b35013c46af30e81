//! The client-facing event set.
//!
//! One response is one ordered sequence of these events, terminated by
//! exactly one of `message_end` or `error` — never both.

use serde::Serialize;

use parley_domain::pending::PendingAction;

/// Events emitted during a single chat response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// Session resolved; model output follows.
    #[serde(rename = "message_start")]
    MessageStart {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },

    /// Incremental assistant output. Exactly one of `text` or
    /// `partial_json` is set per event.
    #[serde(rename = "content_delta")]
    ContentDelta {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_json: Option<String>,
    },

    /// A tool call has been finalized (input fully reassembled).
    #[serde(rename = "function_call")]
    FunctionCall { id: String, name: String },

    /// A tool invocation is still running.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        status: String,
        tool_name: String,
        elapsed_seconds: u64,
    },

    /// One tool call's result (success or error).
    #[serde(rename = "function_result")]
    FunctionResult {
        tool_use_id: String,
        name: String,
        result: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// Normal completion. Emitted only after the assistant turn is durably
    /// stored.
    #[serde(rename = "message_end")]
    MessageEnd {
        session_id: String,
        tokens_used: u32,
        latency_ms: u64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pending_imports: Vec<PendingAction>,
    },

    /// Terminal failure; no further events follow.
    #[serde(rename = "error")]
    Error {
        error_type: String,
        message: String,
    },
}

impl ChatEvent {
    pub fn text(text: impl Into<String>) -> Self {
        ChatEvent::ContentDelta {
            text: Some(text.into()),
            partial_json: None,
        }
    }

    pub fn heartbeat(tool_name: impl Into<String>, elapsed_seconds: u64) -> Self {
        ChatEvent::Heartbeat {
            status: "executing_tool".into(),
            tool_name: tool_name.into(),
            elapsed_seconds,
        }
    }

    pub fn error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        ChatEvent::Error {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// The SSE event name for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::MessageStart { .. } => "message_start",
            ChatEvent::ContentDelta { .. } => "content_delta",
            ChatEvent::FunctionCall { .. } => "function_call",
            ChatEvent::Heartbeat { .. } => "heartbeat",
            ChatEvent::FunctionResult { .. } => "function_result",
            ChatEvent::MessageEnd { .. } => "message_end",
            ChatEvent::Error { .. } => "error",
        }
    }
}
