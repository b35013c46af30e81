//! Heartbeat-wrapped tool execution.
//!
//! The invocation runs as its own spawned task; this module only time-boxes
//! the *waiting*. Each elapsed interval without completion yields one
//! heartbeat pulse, then waiting resumes — the underlying task is never
//! cancelled or restarted, so a tool runs exactly once regardless of how
//! slow it is.

use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use serde_json::Value;

use super::tools::{ToolContext, ToolDispatcher};

/// How long to wait on a running tool before emitting a heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Progress pulses for one tool invocation: zero or more heartbeats, then
/// exactly one `Done`.
#[derive(Debug, Clone)]
pub enum ToolPulse {
    Heartbeat { elapsed_seconds: u64 },
    Done { result: String, is_error: bool },
}

/// Execute one tool invocation, interleaving heartbeats while it runs.
///
/// Dispatcher errors and join failures are folded into a structured error
/// string with `is_error` set; they never escape as panics or stream errors.
pub fn execute_with_heartbeat(
    dispatcher: Arc<dyn ToolDispatcher>,
    name: String,
    input: Value,
    ctx: ToolContext,
) -> impl Stream<Item = ToolPulse> + Send {
    async_stream::stream! {
        let task_name = name.clone();
        let mut handle = tokio::spawn(async move {
            dispatcher.execute(&task_name, &input, &ctx).await
        });

        let started = tokio::time::Instant::now();

        loop {
            // Polling the JoinHandle under a timeout only abandons the
            // *wait* when the interval elapses; the spawned task keeps
            // running untouched.
            match tokio::time::timeout(HEARTBEAT_INTERVAL, &mut handle).await {
                Ok(joined) => {
                    let (result, is_error) = match joined {
                        Ok(Ok(result)) => (result, false),
                        Ok(Err(e)) => {
                            tracing::warn!(tool = %name, error = %e, "tool execution failed");
                            (format!("tool execution failed: {e}"), true)
                        }
                        Err(e) => {
                            tracing::error!(tool = %name, error = %e, "tool task aborted");
                            (format!("tool task aborted: {e}"), true)
                        }
                    };
                    yield ToolPulse::Done { result, is_error };
                    break;
                }
                Err(_) => {
                    let elapsed_seconds = started.elapsed().as_secs();
                    tracing::debug!(tool = %name, elapsed_seconds, "tool still executing");
                    yield ToolPulse::Heartbeat { elapsed_seconds };
                }
            }
        }
    }
}
