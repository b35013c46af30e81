use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Raw fragments emitted while streaming one model turn.
///
/// Tool-call input arrives as incremental JSON text belonging to the most
/// recently started tool use; reassembly and parsing are the caller's job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ModelEvent {
    /// A chunk of assistant text.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// The model has started a tool call. Subsequent `InputJsonDelta`
    /// fragments with the same id belong to this call's input.
    #[serde(rename = "tool_use_start")]
    ToolUseStart { id: String, name: String },

    /// An incremental fragment of a tool call's input JSON.
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { id: String, partial_json: String },

    /// The model turn is over.
    #[serde(rename = "turn_end")]
    TurnEnd {
        stop_reason: StopReason,
        usage: Option<Usage>,
    },

    /// The upstream stream failed mid-turn. Not recoverable.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Why the model stopped producing output for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Normal completion; the response is done.
    EndTurn,
    /// The model wants its tool calls executed and the results fed back.
    ToolUse,
    /// The output limit was hit.
    MaxTokens,
}

/// Token usage for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}
