use serde::{Deserialize, Serialize};

/// An action the model has extracted but not yet committed.
///
/// Lives only in request-scoped state: it is returned to the client inside
/// `message_end` and supplied back on the next request, never durably
/// persisted. The key is a stable source identifier (e.g. a source URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}
