//! Model-streaming clients.
//!
//! [`ModelClient`] is the seam the orchestration engine streams through; the
//! Anthropic Messages adapter is the production implementation. Adapters
//! emit raw fragment events ([`parley_domain::stream::ModelEvent`]) — they
//! never reassemble tool-call input themselves.

pub mod anthropic;
mod sse;
mod traits;

pub use anthropic::AnthropicClient;
pub use traits::{ModelClient, ModelRequest};

use parley_domain::Error;

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
