//! Tool-call input reassembly.
//!
//! The model streams a tool call as a start marker followed by incremental
//! JSON fragments; the input exists as a parseable value only once the
//! call's boundary is reached (the next tool-use start, or turn end).
//! [`ToolUseAccumulator`] owns that buffering and finalization so the loop
//! never touches partial JSON.

use serde_json::Value;

/// A finalized tool call's input: parsed on success, or the raw buffer plus
/// the parse error. An invalid input is never executed — it turns into a
/// synthetic error result fed back to the model.
#[derive(Debug, Clone)]
pub enum ToolInput {
    Parsed(Value),
    Invalid { raw: String, error: String },
}

/// A tool call whose input has been fully reassembled.
#[derive(Debug, Clone)]
pub struct FinalizedToolUse {
    pub id: String,
    pub name: String,
    pub input: ToolInput,
}

impl FinalizedToolUse {
    /// The input value to echo back to the model in the tool_use block.
    /// Invalid inputs are echoed as their raw text.
    pub fn input_value(&self) -> Value {
        match &self.input {
            ToolInput::Parsed(v) => v.clone(),
            ToolInput::Invalid { raw, .. } => Value::String(raw.clone()),
        }
    }
}

/// The tool call currently receiving fragments.
struct OpenToolUse {
    id: String,
    name: String,
    buffer: String,
}

/// Buffered accumulator for streamed tool-call input, keyed by the model's
/// call id. At most one call accumulates at a time; starting a new call or
/// ending the turn finalizes the open one.
#[derive(Default)]
pub struct ToolUseAccumulator {
    open: Option<OpenToolUse>,
}

impl ToolUseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin accumulating a new tool call. Returns the previously open call,
    /// finalized, if there was one.
    pub fn start(&mut self, id: String, name: String) -> Option<FinalizedToolUse> {
        let finalized = self.finalize_open();
        self.open = Some(OpenToolUse {
            id,
            name,
            buffer: String::new(),
        });
        finalized
    }

    /// Append an input-JSON fragment. Fragments for an id other than the
    /// open call's are dropped (the model only streams one block at a time).
    pub fn fragment(&mut self, id: &str, partial_json: &str) {
        if let Some(open) = self.open.as_mut() {
            if open.id == id {
                open.buffer.push_str(partial_json);
            } else {
                tracing::warn!(
                    open_id = %open.id,
                    fragment_id = %id,
                    "input fragment for a non-open tool call dropped"
                );
            }
        }
    }

    /// The turn ended: finalize the open call, if any.
    pub fn finish(&mut self) -> Option<FinalizedToolUse> {
        self.finalize_open()
    }

    fn finalize_open(&mut self) -> Option<FinalizedToolUse> {
        let open = self.open.take()?;

        // No fragments at all means an empty input, not an error.
        let input = if open.buffer.trim().is_empty() {
            ToolInput::Parsed(Value::Object(Default::default()))
        } else {
            match serde_json::from_str(&open.buffer) {
                Ok(v) => ToolInput::Parsed(v),
                Err(e) => ToolInput::Invalid {
                    raw: open.buffer,
                    error: e.to_string(),
                },
            }
        };

        Some(FinalizedToolUse {
            id: open.id,
            name: open.name,
            input,
        })
    }
}
