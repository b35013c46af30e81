//! The Parley gateway: the streaming tool-call orchestration engine and its
//! HTTP surface.

pub mod api;
pub mod bootstrap;
pub mod runtime;
pub mod state;
