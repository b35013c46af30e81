//! Pending-action tracking across turns.
//!
//! When an extractor tool succeeds without persisting (the user hasn't
//! confirmed the save yet), the extracted source becomes a pending action.
//! The list is request-scoped: it travels to the client in `message_end`
//! and comes back with the next request, so no server-side affinity is
//! needed. Rendering tells the model exactly which commit call to issue so
//! it never re-runs the extractor.

use serde_json::Value;

use parley_domain::pending::PendingAction;

/// Tools whose name starts with this prefix extract content from a source
/// without committing it.
pub const EXTRACTOR_PREFIX: &str = "extract_";

/// The tool that commits a previously extracted source.
pub const COMMIT_TOOL: &str = "commit_import";

/// Union the caller-supplied list into the current one, deduplicated by key.
/// Existing entries win.
pub fn union(mut current: Vec<PendingAction>, incoming: &[PendingAction]) -> Vec<PendingAction> {
    for action in incoming {
        if !current.iter().any(|a| a.key == action.key) {
            current.push(action.clone());
        }
    }
    current
}

/// Update the pending list from one finished tool call.
///
/// - An extractor reporting `{success: true, persisted: false}` appends a
///   pending action keyed by its source reference (dedup by key).
/// - The committer reporting `{success: true, persisted: true}` removes all
///   actions matching the input's source reference.
/// - Anything else (non-JSON results included) leaves the list untouched.
pub fn apply(pending: &mut Vec<PendingAction>, tool_name: &str, input: &Value, result: &str) {
    let parsed: Value = match serde_json::from_str(result) {
        Ok(v) => v,
        Err(_) => return,
    };

    let success = parsed.get("success").and_then(Value::as_bool).unwrap_or(false);
    let persisted = parsed
        .get("persisted")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if tool_name.starts_with(EXTRACTOR_PREFIX) && success && !persisted {
        let Some(key) = source_ref(&parsed).or_else(|| source_ref(input)) else {
            tracing::warn!(tool = %tool_name, "extractor result has no source reference");
            return;
        };
        if pending.iter().any(|a| a.key == key) {
            return;
        }
        let label = parsed
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(tool_name)
            .to_string();
        let count = parsed
            .get("count")
            .and_then(Value::as_u64)
            .map(|c| c as u32);
        pending.push(PendingAction { key, label, count });
    } else if tool_name == COMMIT_TOOL && success && persisted {
        if let Some(key) = source_ref(input).or_else(|| source_ref(&parsed)) {
            pending.retain(|a| a.key != key);
        }
    }
}

/// Render the pending list as prompt text, or `None` when empty.
pub fn render(pending: &[PendingAction]) -> Option<String> {
    if pending.is_empty() {
        return None;
    }

    let mut out = String::from(
        "## Pending imports\n\
         The following sources were already extracted but are NOT saved yet. \
         Do not extract them again.\n",
    );
    for action in pending {
        let count = action
            .count
            .map(|c| format!(", {c} items"))
            .unwrap_or_default();
        out.push_str(&format!(
            "- \"{}\" ({}{}) — to save it, call {} with {{\"source_ref\": \"{}\"}}\n",
            action.label, action.key, count, COMMIT_TOOL, action.key
        ));
    }
    Some(out)
}

fn source_ref(v: &Value) -> Option<String> {
    v.get("source_ref")
        .or_else(|| v.get("url"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
