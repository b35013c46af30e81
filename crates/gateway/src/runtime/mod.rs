//! The response pipeline and its supporting machinery.
//!
//! [`chat::run_chat`] is the entry point; the rest of the modules are the
//! pieces it composes: session gating, history reconstruction, tool-input
//! reassembly, heartbeat execution, pending-action tracking, persistence
//! ordering, and per-user pipeline slots.

pub mod assembly;
pub mod chat;
pub mod events;
pub mod gate;
pub mod heartbeat;
pub mod history;
pub mod pending;
pub mod persist;
pub mod slots;
pub mod tools;

pub use chat::{run_chat, ChatInput, MAX_ITERATIONS};
pub use events::ChatEvent;

use parley_domain::Error;

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
