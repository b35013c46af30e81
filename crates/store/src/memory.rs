//! In-memory repository implementations.
//!
//! Lock-protected maps with the same observable semantics the production
//! backends must provide: append-only turns in creation order and monthly
//! usage counters that roll over with the UTC month.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use parking_lot::RwLock;

use parley_domain::turn::{Session, Turn};
use parley_domain::{Error, Result};

use crate::{SessionRepo, TurnRepo, UsageRepo};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemorySessionRepo {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepo for MemorySessionRepo {
    async fn create(&self, user_id: &str) -> Result<Session> {
        let session = Session::new(user_id);
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn update_title(&self, session_id: &str, title: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;
        session.title = Some(title.to_owned());
        session.updated_at = Utc::now();
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryTurnRepo {
    /// session_id -> turns in creation order.
    turns: RwLock<HashMap<String, Vec<Turn>>>,
}

impl MemoryTurnRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TurnRepo for MemoryTurnRepo {
    async fn create(&self, turn: Turn) -> Result<Turn> {
        self.turns
            .write()
            .entry(turn.session_id.clone())
            .or_default()
            .push(turn.clone());
        Ok(turn)
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self
            .turns
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MonthlyCount {
    /// `(year, month)` the counter belongs to.
    month: (i32, u32),
    count: u32,
}

/// Per-user monthly counters. Counters reset implicitly when the UTC month
/// rolls over.
#[derive(Default)]
pub struct MemoryUsageRepo {
    usage: RwLock<HashMap<String, MonthlyCount>>,
}

impl MemoryUsageRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_month() -> (i32, u32) {
        let now = Utc::now();
        (now.year(), now.month())
    }
}

#[async_trait]
impl UsageRepo for MemoryUsageRepo {
    async fn get_monthly_usage(&self, user_id: &str) -> Result<u32> {
        let month = Self::current_month();
        Ok(self
            .usage
            .read()
            .get(user_id)
            .filter(|e| e.month == month)
            .map(|e| e.count)
            .unwrap_or(0))
    }

    async fn increment(&self, user_id: &str) -> Result<()> {
        let month = Self::current_month();
        let mut usage = self.usage.write();
        let entry = usage
            .entry(user_id.to_owned())
            .or_insert(MonthlyCount { month, count: 0 });
        if entry.month != month {
            entry.month = month;
            entry.count = 0;
        }
        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_domain::turn::TurnRole;

    #[tokio::test]
    async fn session_create_and_get() {
        let repo = MemorySessionRepo::new();
        let session = repo.create("u1").await.unwrap();
        assert_eq!(session.user_id, "u1");
        assert!(session.title.is_none());

        let fetched = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_title_on_missing_session_errors() {
        let repo = MemorySessionRepo::new();
        let err = repo.update_title("nope", "t").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn turns_preserve_creation_order() {
        let repo = MemoryTurnRepo::new();
        repo.create(Turn::user("s1", "first")).await.unwrap();
        repo.create(Turn::assistant("s1", "second", Vec::new(), 10, 5))
            .await
            .unwrap();
        repo.create(Turn::user("s1", "third")).await.unwrap();

        let turns = repo.list_for_session("s1").await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[2].content.as_deref(), Some("third"));
        assert!(repo.list_for_session("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_counts_per_user() {
        let repo = MemoryUsageRepo::new();
        assert_eq!(repo.get_monthly_usage("u1").await.unwrap(), 0);

        repo.increment("u1").await.unwrap();
        repo.increment("u1").await.unwrap();
        repo.increment("u2").await.unwrap();

        assert_eq!(repo.get_monthly_usage("u1").await.unwrap(), 2);
        assert_eq!(repo.get_monthly_usage("u2").await.unwrap(), 1);
    }
}
