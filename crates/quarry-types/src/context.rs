use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-turn context handed to every tool call by the hosting runtime.
///
/// `turn_started_at` is the timestamp of the user message that triggered this
/// turn; the edit engine compares it against a document's `created_at` to
/// decide whether an edit folds into the current version or mints a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    pub user_id: String,
    pub organization_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub turn_started_at: DateTime<Utc>,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            message_id: None,
            turn_started_at: Utc::now(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}
