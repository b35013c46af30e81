//! Storage interfaces for Parley.
//!
//! The gateway talks to storage exclusively through these narrow repository
//! traits; [`memory`] provides the in-memory implementations used in dev mode
//! and tests.

pub mod memory;

use async_trait::async_trait;

use parley_domain::turn::{Session, Turn};
use parley_domain::Result;

/// Session repository: create, look up, and title sessions.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn create(&self, user_id: &str) -> Result<Session>;
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn update_title(&self, session_id: &str, title: &str) -> Result<()>;
}

/// Turn repository: append-only turn storage per session.
#[async_trait]
pub trait TurnRepo: Send + Sync {
    async fn create(&self, turn: Turn) -> Result<Turn>;
    /// All turns for a session in creation order.
    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Turn>>;
}

/// Usage repository: per-user monthly response counters.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    async fn get_monthly_usage(&self, user_id: &str) -> Result<u32>;
    async fn increment(&self, user_id: &str) -> Result<()>;
}
