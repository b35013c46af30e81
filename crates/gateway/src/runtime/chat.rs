//! The response pipeline — the orchestrator that streams model output,
//! reassembles and dispatches tool calls, and loops until the model stops
//! asking for tools.
//!
//! Entry point: [`run_chat`] spawns the async pipeline and returns a
//! channel of [`ChatEvent`]s.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use parley_domain::chat::{ContentPart, Message, ToolInvocation};
use parley_domain::pending::PendingAction;
use parley_domain::stream::{ModelEvent, StopReason};
use parley_domain::turn::Turn;
use parley_domain::Result;
use parley_providers::ModelRequest;

use crate::state::AppState;

use super::assembly::{FinalizedToolUse, ToolInput, ToolUseAccumulator};
use super::events::ChatEvent;
use super::gate::GateDecision;
use super::heartbeat::{execute_with_heartbeat, ToolPulse};
use super::pending;
use super::tools::ToolContext;

/// Maximum model calls per response before the loop force-stops.
pub const MAX_ITERATIONS: usize = 10;

/// Input to one chat response.
pub struct ChatInput {
    pub user_id: String,
    pub message: String,
    /// `None` starts a new session.
    pub session_id: Option<String>,
    /// Client view state injected into the system prompt verbatim.
    pub ui_context: Option<Value>,
    /// Pending actions the client is carrying from earlier responses.
    pub pending_actions: Vec<PendingAction>,
    /// Bearer credential forwarded to the tool service.
    pub forwarded_credential: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_chat — spawn the pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one chat response. The caller reads events as they arrive for SSE
/// streaming, or drains them for the non-streaming endpoint.
///
/// Every response ends with exactly one terminal event: `message_end` on
/// success, `error` otherwise. A send on a closed channel means the client
/// went away; the pipeline keeps running so persistence still completes.
pub fn run_chat(state: AppState, input: ChatInput) -> mpsc::Receiver<ChatEvent> {
    let (tx, rx) = mpsc::channel::<ChatEvent>(64);

    let trace_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "chat",
        trace_id = %trace_id,
        user = %input.user_id,
    );

    tokio::spawn(
        async move {
            tracing::debug!("response pipeline started");
            if let Err(e) = run_chat_inner(state, input, tx.clone(), trace_id).await {
                tracing::error!(error = %e, "response pipeline failed");
                let _ = tx
                    .send(ChatEvent::error("internal", "an internal error occurred"))
                    .await;
            }
        }
        .instrument(span),
    );

    rx
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_chat_inner — the tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_chat_inner(
    state: AppState,
    input: ChatInput,
    tx: mpsc::Sender<ChatEvent>,
    trace_id: String,
) -> Result<()> {
    // ── Gate ─────────────────────────────────────────────────────
    if let GateDecision::Denied(denial) = state.gate.check(&input.user_id).await? {
        tracing::info!(user = %input.user_id, reason = denial.error_type(), "request denied");
        let _ = tx
            .send(ChatEvent::error(denial.error_type(), denial.message()))
            .await;
        return Ok(());
    }

    // ── Resolve the session ──────────────────────────────────────
    let (session, is_new) = match &input.session_id {
        Some(id) => match state.sessions.get(id).await? {
            Some(session) => (session, false),
            None => {
                let _ = tx
                    .send(ChatEvent::error(
                        "session_not_found",
                        format!("no session with id {id}"),
                    ))
                    .await;
                return Ok(());
            }
        },
        None => (state.sessions.create(&input.user_id).await?, true),
    };

    let started = Instant::now();

    // The user turn lands before the first model call so history rebuilt
    // mid-pipeline (or by a concurrent reader) already contains it.
    state
        .persistence
        .store_turn_blocking(Turn::user(&session.id, &input.message))
        .await;
    if is_new {
        state
            .persistence
            .auto_title_detached(&session.id, &input.message);
    }

    let turns = state.turns.list_for_session(&session.id).await?;
    let mut messages = super::history::build_messages(&turns);

    let _ = tx
        .send(ChatEvent::MessageStart {
            session_id: session.id.clone(),
            trace_id: Some(trace_id),
        })
        .await;

    // ── Tool loop ────────────────────────────────────────────────
    let tool_defs = state.tools.definitions();
    let ctx = ToolContext {
        user_id: input.user_id.clone(),
        forwarded_credential: input.forwarded_credential.clone(),
    };

    let mut pending = pending::union(Vec::new(), &input.pending_actions);
    let mut response_text = String::new();
    let mut all_invocations: Vec<ToolInvocation> = Vec::new();
    let mut total_tokens: u32 = 0;

    for iteration in 0..MAX_ITERATIONS {
        tracing::debug!(iteration, "model call");

        let req = ModelRequest {
            messages: messages.clone(),
            system: build_system_prompt(
                &state.config.prompt.system,
                input.ui_context.as_ref(),
                &pending,
            ),
            tools: tool_defs.clone(),
            max_tokens: Some(state.config.model.max_tokens),
        };

        let mut stream = match state.model.stream(req).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "model call failed");
                let _ = tx
                    .send(ChatEvent::error("upstream_error", e.to_string()))
                    .await;
                return Ok(());
            }
        };

        // Usage counts model calls, not responses; a denied request never
        // reaches this point.
        state.persistence.increment_usage_detached(&input.user_id);

        let mut acc = ToolUseAccumulator::new();
        let mut finalized: Vec<FinalizedToolUse> = Vec::new();
        let mut iteration_text = String::new();
        let mut stop_reason = StopReason::EndTurn;

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "model stream failed mid-turn");
                    let _ = tx
                        .send(ChatEvent::error("upstream_error", e.to_string()))
                        .await;
                    return Ok(());
                }
            };

            match event {
                ModelEvent::TextDelta { text } => {
                    let _ = tx.send(ChatEvent::text(text.clone())).await;
                    iteration_text.push_str(&text);
                }
                ModelEvent::ToolUseStart { id, name } => {
                    if let Some(call) = acc.start(id, name) {
                        announce_call(&tx, &call).await;
                        finalized.push(call);
                    }
                }
                ModelEvent::InputJsonDelta { id, partial_json } => {
                    let _ = tx
                        .send(ChatEvent::ContentDelta {
                            text: None,
                            partial_json: Some(partial_json.clone()),
                        })
                        .await;
                    acc.fragment(&id, &partial_json);
                }
                ModelEvent::TurnEnd {
                    stop_reason: reason,
                    usage,
                } => {
                    stop_reason = reason;
                    if let Some(u) = usage {
                        total_tokens += u.total();
                    }
                }
                ModelEvent::Error { message } => {
                    tracing::warn!(error = %message, "model reported an error");
                    let _ = tx.send(ChatEvent::error("upstream_error", message)).await;
                    return Ok(());
                }
            }
        }

        if let Some(call) = acc.finish() {
            announce_call(&tx, &call).await;
            finalized.push(call);
        }

        if !iteration_text.is_empty() {
            if !response_text.is_empty() {
                response_text.push('\n');
            }
            response_text.push_str(&iteration_text);
        }

        // No tool calls means this was the final answer.
        if finalized.is_empty() {
            break;
        }

        // ── Dispatch tool calls, in model order ──────────────────
        let mut uses = Vec::with_capacity(finalized.len());
        let mut result_parts = Vec::with_capacity(finalized.len());

        for call in &finalized {
            let (result, is_error) = match &call.input {
                ToolInput::Invalid { error, .. } => {
                    // Never executed: the model gets an error result and may
                    // retry with well-formed input on the next iteration.
                    tracing::warn!(tool = %call.name, error = %error, "tool input did not parse");
                    (format!("invalid tool arguments: {error}"), true)
                }
                ToolInput::Parsed(value) => {
                    dispatch_with_heartbeats(&state, &tx, call, value.clone(), ctx.clone()).await
                }
            };

            if let ToolInput::Parsed(value) = &call.input {
                if !is_error {
                    pending::apply(&mut pending, &call.name, value, &result);
                }
            }

            let invocation = ToolInvocation {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input_value(),
                result: result.clone(),
                is_error,
            };
            let _ = tx
                .send(ChatEvent::FunctionResult {
                    tool_use_id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                    is_error,
                })
                .await;
            state
                .persistence
                .store_tool_result_detached(&session.id, invocation.clone());

            uses.push(ContentPart::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input_value(),
            });
            result_parts.push(ContentPart::ToolResult {
                tool_use_id: call.id.clone(),
                content: result,
                is_error,
            });
            all_invocations.push(invocation);
        }

        messages.push(Message::assistant_tool_uses(&iteration_text, uses));
        messages.push(Message::tool_results(result_parts));

        if stop_reason != StopReason::ToolUse {
            break;
        }
        if iteration + 1 == MAX_ITERATIONS {
            tracing::warn!(session = %session.id, "iteration limit reached, forcing stop");
        }
    }

    // ── Finalize ─────────────────────────────────────────────────
    let latency_ms = started.elapsed().as_millis() as u64;

    // The assistant turn is durable before message_end: a client that sees
    // the terminal event can immediately read the turn back.
    state
        .persistence
        .store_turn_blocking(Turn::assistant(
            &session.id,
            &response_text,
            all_invocations,
            total_tokens,
            latency_ms,
        ))
        .await;

    let _ = tx
        .send(ChatEvent::MessageEnd {
            session_id: session.id,
            tokens_used: total_tokens,
            latency_ms,
            pending_imports: pending,
        })
        .await;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn announce_call(tx: &mpsc::Sender<ChatEvent>, call: &FinalizedToolUse) {
    let _ = tx
        .send(ChatEvent::FunctionCall {
            id: call.id.clone(),
            name: call.name.clone(),
        })
        .await;
}

/// Run one tool through the heartbeat executor, forwarding heartbeats as
/// client events, and return its result.
async fn dispatch_with_heartbeats(
    state: &AppState,
    tx: &mpsc::Sender<ChatEvent>,
    call: &FinalizedToolUse,
    input: Value,
    ctx: ToolContext,
) -> (String, bool) {
    let pulses = execute_with_heartbeat(
        Arc::clone(&state.tools),
        call.name.clone(),
        input,
        ctx,
    );
    let mut pulses = std::pin::pin!(pulses);

    while let Some(pulse) = pulses.next().await {
        match pulse {
            ToolPulse::Heartbeat { elapsed_seconds } => {
                let _ = tx
                    .send(ChatEvent::heartbeat(&call.name, elapsed_seconds))
                    .await;
            }
            ToolPulse::Done { result, is_error } => return (result, is_error),
        }
    }

    // The executor always ends with Done; an empty stream means the task
    // vanished.
    ("tool produced no result".into(), true)
}

/// Compose the per-call system prompt: base text, then the client's view
/// state, then the pending-import instructions.
fn build_system_prompt(
    base: &str,
    ui_context: Option<&Value>,
    pending: &[PendingAction],
) -> String {
    let mut prompt = base.to_string();

    if let Some(ctx) = ui_context {
        prompt.push_str("\n\n## Current view\n");
        prompt.push_str(&ctx.to_string());
    }

    if let Some(rendered) = pending::render(pending) {
        prompt.push_str("\n\n");
        prompt.push_str(&rendered);
    }

    prompt
}
