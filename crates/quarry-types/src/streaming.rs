use serde::{Deserialize, Serialize};

/// Lifecycle status of one sub-item inside a batched tool call.
///
/// Statuses only move forward: `Loading → Processing → {Completed, Failed}`.
/// Once terminal, a later delta must never downgrade the item.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Loading,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            ItemStatus::Loading => 0,
            ItemStatus::Processing => 1,
            ItemStatus::Completed | ItemStatus::Failed => 2,
        }
    }

    /// Advance to `next` only if that does not move backwards.
    pub fn advance(self, next: ItemStatus) -> ItemStatus {
        if next.rank() >= self.rank() {
            next
        } else {
            self
        }
    }
}

/// One unit of work inside a batched tool call: one metric file, one
/// dashboard file, one report edit. Identity is positional index while
/// streaming, then the stable `id` once resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamedFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u32>,
}

impl StreamedFile {
    /// Overwrite `field` with `value` only when the incoming value is
    /// non-empty. Streaming must never erase an already-populated field.
    pub fn fill_name(&mut self, value: &str) -> bool {
        fill(&mut self.name, value)
    }

    pub fn fill_content(&mut self, value: &str) -> bool {
        fill(&mut self.content, value)
    }
}

fn fill(slot: &mut Option<String>, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if slot.as_deref() == Some(value) {
        return false;
    }
    *slot = Some(value.to_string());
    true
}
