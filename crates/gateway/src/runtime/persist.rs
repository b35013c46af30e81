//! Persistence ordering for the response pipeline.
//!
//! Two tiers. Blocking writes (the user turn before the first model call,
//! the assistant turn before `message_end`) order the response around
//! durability but never fail it: a storage error is logged and the stream
//! continues. Best-effort writes (usage counters, auto-titles, standalone
//! tool-result records) run on detached tasks and only warn on failure.

use std::sync::Arc;

use parley_domain::chat::ToolInvocation;
use parley_domain::turn::Turn;
use parley_store::{SessionRepo, TurnRepo, UsageRepo};

const TITLE_MAX_CHARS: usize = 80;

pub struct PersistenceCoordinator {
    sessions: Arc<dyn SessionRepo>,
    turns: Arc<dyn TurnRepo>,
    usage: Arc<dyn UsageRepo>,
}

impl PersistenceCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionRepo>,
        turns: Arc<dyn TurnRepo>,
        usage: Arc<dyn UsageRepo>,
    ) -> Self {
        Self {
            sessions,
            turns,
            usage,
        }
    }

    /// Write a turn before the pipeline moves on. A failure is logged and
    /// swallowed; losing one record is better than failing the response.
    pub async fn store_turn_blocking(&self, turn: Turn) {
        let session_id = turn.session_id.clone();
        if let Err(e) = self.turns.create(turn).await {
            tracing::error!(session = %session_id, error = %e, "turn write failed");
        }
    }

    /// Record a tool invocation as its own audit turn, off the hot path.
    pub fn store_tool_result_detached(&self, session_id: &str, invocation: ToolInvocation) {
        let turns = self.turns.clone();
        let turn = Turn::tool_result(session_id, invocation);
        tokio::spawn(async move {
            let session_id = turn.session_id.clone();
            if let Err(e) = turns.create(turn).await {
                tracing::warn!(session = %session_id, error = %e, "tool result write failed");
            }
        });
    }

    /// Bump the user's monthly counter, off the hot path.
    pub fn increment_usage_detached(&self, user_id: &str) {
        let usage = self.usage.clone();
        let user_id = user_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = usage.increment(&user_id).await {
                tracing::warn!(user = %user_id, error = %e, "usage increment failed");
            }
        });
    }

    /// Title a fresh session from its first message, off the hot path.
    pub fn auto_title_detached(&self, session_id: &str, first_message: &str) {
        let sessions = self.sessions.clone();
        let session_id = session_id.to_owned();
        let title = derive_title(first_message);
        tokio::spawn(async move {
            if let Err(e) = sessions.update_title(&session_id, &title).await {
                tracing::warn!(session = %session_id, error = %e, "auto-title failed");
            }
        });
    }
}

/// First line of the message, truncated on a char boundary.
fn derive_title(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let mut title: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
    if first_line.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}
