//! Per-call streaming state and its reconciliation with extractor output.
//!
//! Each tool call owns one `ToolCallState`. Deltas append raw text; on every
//! delta the optimistic parser re-runs over the full accumulated text, since
//! earlier keys may only become valid once more text arrives. Reconciliation
//! is monotone: fields are never erased by an empty value and statuses never
//! move backwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use quarry_json::get_optimistic_array;
use quarry_types::{ItemStatus, StreamedFile};

/// Where a tool's sub-items live inside its streamed argument object.
/// `name_key` is empty for item shapes that carry no display name (report
/// edits).
#[derive(Debug, Clone, Copy)]
pub struct ItemFields {
    pub array_key: &'static str,
    pub name_key: &'static str,
    pub content_key: &'static str,
}

pub const FILE_FIELDS: ItemFields = ItemFields {
    array_key: "files",
    name_key: "name",
    content_key: "yml_content",
};

pub const EDIT_FIELDS: ItemFields = ItemFields {
    array_key: "edits",
    name_key: "",
    content_key: "code",
};

/// True outcome of one sub-item after execute, merged back into the state.
#[derive(Debug, Clone, Default)]
pub struct ItemOutcome {
    pub name: Option<String>,
    pub id: Option<String>,
    pub version_number: Option<u32>,
    pub status: ItemStatus,
    pub error: Option<String>,
}

/// Mutable record for one in-flight tool call. Created at start, mutated by
/// every delta and the validated input, read then discarded at execute
/// completion.
#[derive(Debug, Clone)]
pub struct ToolCallState {
    pub tool_call_id: String,
    pub accumulated_text: String,
    pub items: BTreeMap<usize, StreamedFile>,
    pub started_at: DateTime<Utc>,
    /// Document id minted or discovered during streaming (report tools).
    pub document_id: Option<String>,
    pub initial_entries_created: bool,
}

impl ToolCallState {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            accumulated_text: String::new(),
            items: BTreeMap::new(),
            started_at: Utc::now(),
            document_id: None,
            initial_entries_created: false,
        }
    }

    /// Append one raw chunk and reconcile whatever the parser can now
    /// recover. Returns true when any item actually changed, so callers can
    /// skip redundant progress writes.
    pub fn ingest_delta(&mut self, chunk: &str, fields: &ItemFields) -> bool {
        self.accumulated_text.push_str(chunk);
        let parsed = quarry_json::parse(&self.accumulated_text);
        self.reconcile_array(
            &get_optimistic_array(&parsed.extracted_values, fields.array_key),
            fields,
        )
    }

    fn reconcile_array(&mut self, elements: &[Value], fields: &ItemFields) -> bool {
        let mut changed = false;
        for (index, element) in elements.iter().enumerate() {
            let Some(object) = element.as_object() else {
                continue;
            };
            if !self.items.contains_key(&index) {
                self.items.insert(index, StreamedFile::default());
                changed = true;
            }
            let item = self.items.get_mut(&index).expect("just inserted");
            if !fields.name_key.is_empty() {
                if let Some(name) = object.get(fields.name_key).and_then(Value::as_str) {
                    changed |= item.fill_name(name);
                }
            }
            if let Some(content) = object.get(fields.content_key).and_then(Value::as_str) {
                changed |= item.fill_content(content);
            }
            if item.content.is_some() && item.status == ItemStatus::Loading {
                item.status = ItemStatus::Processing;
                changed = true;
            }
        }
        changed
    }

    /// Apply the fully-validated input as authoritative content, preserving
    /// identity (`id`, version) already assigned during streaming.
    pub fn apply_validated(&mut self, input: &Value, fields: &ItemFields) {
        let Some(elements) = input.get(fields.array_key).and_then(Value::as_array) else {
            return;
        };
        for (index, element) in elements.iter().enumerate() {
            let Some(object) = element.as_object() else {
                continue;
            };
            let item = self.items.entry(index).or_default();
            if !fields.name_key.is_empty() {
                if let Some(name) = object.get(fields.name_key).and_then(Value::as_str) {
                    item.name = Some(name.to_string());
                }
            }
            if let Some(content) = object.get(fields.content_key).and_then(Value::as_str) {
                item.content = Some(content.to_string());
            }
            item.status = item.status.advance(ItemStatus::Processing);
        }
    }

    /// Merge execute outcomes into the items, then force everything still
    /// non-terminal to `fallback`. No item may remain `loading` after
    /// execute, or downstream consumers hang.
    pub fn finalize(&mut self, outcomes: &[ItemOutcome], fallback: ItemStatus) {
        for outcome in outcomes {
            let index = self.find_outcome_slot(outcome);
            let Some(index) = index else {
                continue;
            };
            let item = self.items.entry(index).or_default();
            if outcome.id.is_some() {
                item.id = outcome.id.clone();
            }
            if let Some(name) = &outcome.name {
                item.name = Some(name.clone());
            }
            if outcome.version_number.is_some() {
                item.version_number = outcome.version_number;
            }
            item.status = item.status.advance(outcome.status);
            if outcome.error.is_some() {
                item.error = outcome.error.clone();
            }
        }
        for item in self.items.values_mut() {
            if !item.status.is_terminal() {
                item.status = item.status.advance(fallback);
            }
        }
    }

    fn find_outcome_slot(&self, outcome: &ItemOutcome) -> Option<usize> {
        if let Some(name) = &outcome.name {
            if let Some((index, _)) = self
                .items
                .iter()
                .find(|(_, item)| item.name.as_deref() == Some(name.as_str()))
            {
                return Some(*index);
            }
        }
        // No name match: first item without a terminal status.
        self.items
            .iter()
            .find(|(_, item)| !item.status.is_terminal())
            .map(|(index, _)| *index)
            .or_else(|| Some(self.items.len()))
    }
}

/// Registry of in-flight call states for one tool instance. Tool objects are
/// shared across calls and turns, so `start` must fully reset the slot.
#[derive(Default)]
pub struct CallTracker {
    calls: Mutex<HashMap<String, ToolCallState>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, call_id: &str) {
        self.calls
            .lock()
            .expect("call tracker poisoned")
            .insert(call_id.to_string(), ToolCallState::new(call_id));
    }

    pub fn with_state<R>(&self, call_id: &str, f: impl FnOnce(&mut ToolCallState) -> R) -> Option<R> {
        self.calls
            .lock()
            .expect("call tracker poisoned")
            .get_mut(call_id)
            .map(f)
    }

    pub fn snapshot(&self, call_id: &str) -> Option<ToolCallState> {
        self.calls
            .lock()
            .expect("call tracker poisoned")
            .get(call_id)
            .cloned()
    }

    pub fn remove(&self, call_id: &str) -> Option<ToolCallState> {
        self.calls
            .lock()
            .expect("call tracker poisoned")
            .remove(call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_appear_as_keys_stream_in() {
        let mut state = ToolCallState::new("call-1");
        state.ingest_delta(r#"{"files": [{"name": "Reve"#, &FILE_FIELDS);
        let item = state.items.get(&0).expect("partial name is kept");
        assert_eq!(item.name.as_deref(), Some("Reve"));
        assert_eq!(item.status, ItemStatus::Loading);

        state.ingest_delta(r#"nue", "yml_content": "#, &FILE_FIELDS);
        let item = state.items.get(&0).unwrap();
        assert_eq!(item.name.as_deref(), Some("Revenue"));
        assert_eq!(item.status, ItemStatus::Loading);

        state.ingest_delta(r#""sql: select 1""#, &FILE_FIELDS);
        let item = state.items.get(&0).unwrap();
        assert_eq!(item.content.as_deref(), Some("sql: select 1"));
        assert_eq!(item.status, ItemStatus::Processing);
    }

    #[test]
    fn re_ingesting_the_same_text_changes_nothing() {
        let mut state = ToolCallState::new("call-1");
        let text = r#"{"files": [{"name": "Revenue", "yml_content": "sql: select 1"}]}"#;
        assert!(state.ingest_delta(text, &FILE_FIELDS));
        let before = state.items.clone();

        // Re-running the extractor over identical accumulated text is a no-op.
        let parsed = quarry_json::parse(&state.accumulated_text.clone());
        let elements = get_optimistic_array(&parsed.extracted_values, "files");
        let changed = state.reconcile_array(&elements, &FILE_FIELDS);
        assert!(!changed);
        assert_eq!(state.items, before);
    }

    #[test]
    fn statuses_never_regress_across_deltas() {
        let mut state = ToolCallState::new("call-1");
        state.ingest_delta(
            r#"{"files": [{"name": "Revenue", "yml_content": "sql: select 1"}]}"#,
            &FILE_FIELDS,
        );
        state.items.get_mut(&0).unwrap().status = ItemStatus::Completed;

        state.accumulated_text.clear();
        state.ingest_delta(
            r#"{"files": [{"name": "Revenue", "yml_content": "sql: select 2"}]}"#,
            &FILE_FIELDS,
        );
        assert_eq!(state.items.get(&0).unwrap().status, ItemStatus::Completed);
    }

    #[test]
    fn validated_input_overwrites_content_but_keeps_identity() {
        let mut state = ToolCallState::new("call-1");
        state.ingest_delta(
            r#"{"files": [{"name": "Rev", "yml_content": "sql: selec"}]}"#,
            &FILE_FIELDS,
        );
        state.items.get_mut(&0).unwrap().id = Some("metric-1".to_string());

        state.apply_validated(
            &serde_json::json!({"files": [{"name": "Revenue", "yml_content": "sql: select 1"}]}),
            &FILE_FIELDS,
        );
        let item = state.items.get(&0).unwrap();
        assert_eq!(item.id.as_deref(), Some("metric-1"));
        assert_eq!(item.name.as_deref(), Some("Revenue"));
        assert_eq!(item.content.as_deref(), Some("sql: select 1"));
    }

    #[test]
    fn finalize_forces_terminal_statuses() {
        let mut state = ToolCallState::new("call-1");
        state.ingest_delta(
            r#"{"files": [{"name": "A", "yml_content": "x"}, {"name": "B", "yml_content": "y"}]}"#,
            &FILE_FIELDS,
        );

        state.finalize(
            &[ItemOutcome {
                name: Some("A".to_string()),
                id: Some("id-a".to_string()),
                version_number: Some(1),
                status: ItemStatus::Completed,
                error: None,
            }],
            ItemStatus::Failed,
        );

        assert_eq!(state.items.get(&0).unwrap().status, ItemStatus::Completed);
        assert_eq!(state.items.get(&0).unwrap().id.as_deref(), Some("id-a"));
        // Unmentioned item must not stay loading.
        assert_eq!(state.items.get(&1).unwrap().status, ItemStatus::Failed);
    }

    #[test]
    fn edit_items_use_code_field() {
        let mut state = ToolCallState::new("call-1");
        state.ingest_delta(
            r#"{"id": "rep-1", "edits": [{"operation": "replace", "code_to_replace": "a", "code": "b"}]}"#,
            &EDIT_FIELDS,
        );
        let item = state.items.get(&0).unwrap();
        assert_eq!(item.content.as_deref(), Some("b"));
        assert!(item.name.is_none());
    }

    #[test]
    fn tracker_start_resets_residual_state() {
        let tracker = CallTracker::new();
        tracker.start("call-1");
        tracker.with_state("call-1", |state| {
            state.ingest_delta(r#"{"files": [{"name": "A", "yml_content": "x"}]}"#, &FILE_FIELDS);
        });
        tracker.start("call-1");
        assert!(tracker.snapshot("call-1").unwrap().items.is_empty());
    }
}
