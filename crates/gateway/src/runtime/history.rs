//! Reconstructing the model-facing conversation from persisted turns.
//!
//! Assistant turns that carried tool calls expand back into the
//! tool_use / tool_result message pair the provider protocol requires.
//! Standalone tool-result turns are audit records; the same invocations
//! already live on their assistant turn, so they are skipped here.

use parley_domain::chat::{ContentPart, Message};
use parley_domain::turn::{Turn, TurnRole};

/// Rebuild the message list for a session from its stored turns.
pub fn build_messages(turns: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::new();

    for turn in turns {
        match turn.role {
            TurnRole::User => {
                if let Some(content) = &turn.content {
                    messages.push(Message::user(content));
                }
            }
            TurnRole::Assistant => match &turn.tool_invocations {
                Some(invocations) if !invocations.is_empty() => {
                    let text = turn.content.as_deref().unwrap_or_default();
                    let uses = invocations
                        .iter()
                        .map(|inv| ContentPart::ToolUse {
                            id: inv.id.clone(),
                            name: inv.name.clone(),
                            input: inv.input.clone(),
                        })
                        .collect();
                    messages.push(Message::assistant_tool_uses(text, uses));

                    let results = invocations
                        .iter()
                        .map(|inv| ContentPart::ToolResult {
                            tool_use_id: inv.id.clone(),
                            content: inv.result.clone(),
                            is_error: inv.is_error,
                        })
                        .collect();
                    messages.push(Message::tool_results(results));
                }
                _ => {
                    if let Some(content) = turn.content.as_deref().filter(|c| !c.is_empty()) {
                        messages.push(Message::assistant(content));
                    }
                }
            },
            TurnRole::ToolResult => {}
        }
    }

    messages
}
