//! Shared domain types for Parley: chat messages, model stream fragments,
//! persisted turns and sessions, pending actions, configuration, and the
//! crate-wide error type.

pub mod chat;
pub mod config;
pub mod error;
pub mod pending;
pub mod stream;
pub mod turn;

pub use error::{Error, Result};
