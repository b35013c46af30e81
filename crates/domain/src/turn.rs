//! Persisted conversation records.
//!
//! A [`Session`] owns an append-only sequence of [`Turn`]s. Turns are never
//! mutated after the write that creates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::ToolInvocation;

/// A single conversation owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Derived asynchronously from the first message; `None` until then.
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    ToolResult,
}

/// One persisted turn of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub role: TurnRole,
    #[serde(default)]
    pub content: Option<String>,
    /// Tool invocations finalized during this turn, in iteration order.
    #[serde(default)]
    pub tool_invocations: Option<Vec<ToolInvocation>>,
    #[serde(default)]
    pub tokens_used: Option<u32>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(session_id: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role: TurnRole::User,
            content: Some(content.to_owned()),
            tool_invocations: None,
            tokens_used: None,
            latency_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        session_id: &str,
        content: &str,
        tool_invocations: Vec<ToolInvocation>,
        tokens_used: u32,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role: TurnRole::Assistant,
            content: Some(content.to_owned()),
            tool_invocations: if tool_invocations.is_empty() {
                None
            } else {
                Some(tool_invocations)
            },
            tokens_used: Some(tokens_used),
            latency_ms: Some(latency_ms),
            created_at: Utc::now(),
        }
    }

    pub fn tool_result(session_id: &str, invocation: ToolInvocation) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role: TurnRole::ToolResult,
            content: Some(invocation.result.clone()),
            tool_invocations: Some(vec![invocation]),
            tokens_used: None,
            latency_ms: None,
            created_at: Utc::now(),
        }
    }
}
