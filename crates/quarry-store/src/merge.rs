//! Order-preserving keyed merge for conversation entry arrays.
//!
//! Reasoning and response entries carry a stable `id`. Raw LLM turns do not,
//! so their identity derives from the role plus the sorted tool-call ids
//! referenced anywhere in their content. Keys present in both arrays keep
//! their existing position with the incoming value; keys only in the incoming
//! batch are appended in incoming order.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Reasoning,
    RawLlm,
    Response,
}

/// Derive the identity key for one entry. `None` means the entry carries no
/// usable identity and is always treated as new.
pub fn entry_identity_key(kind: EntryKind, entry: &Value) -> Option<String> {
    match kind {
        EntryKind::Reasoning | EntryKind::Response => entry
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        EntryKind::RawLlm => {
            let role = entry.get("role").and_then(Value::as_str)?;
            let mut ids = Vec::new();
            if let Some(content) = entry.get("content") {
                collect_tool_call_ids(content, &mut ids);
            }
            if ids.is_empty() {
                // No tool calls referenced: fall back to a content digest so
                // re-sent identical turns still upsert instead of duplicating.
                let digest = hash_value(entry.get("content").unwrap_or(&Value::Null));
                return Some(format!("{role}:{digest:016x}"));
            }
            ids.sort();
            ids.dedup();
            Some(format!("{role}:{}", ids.join(",")))
        }
    }
}

fn collect_tool_call_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if matches!(key.as_str(), "toolCallId" | "tool_call_id") {
                    if let Some(id) = child.as_str() {
                        out.push(id.to_string());
                    }
                }
                collect_tool_call_ids(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_tool_call_ids(item, out);
            }
        }
        _ => {}
    }
}

fn hash_value(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Merge `incoming` into `existing`, upserting by identity key.
pub fn merge_entries(existing: &[Value], incoming: &[Value], kind: EntryKind) -> Vec<Value> {
    let mut incoming_by_key: HashMap<String, &Value> = HashMap::new();
    for entry in incoming {
        if let Some(key) = entry_identity_key(kind, entry) {
            incoming_by_key.insert(key, entry);
        }
    }

    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    let mut consumed: Vec<String> = Vec::new();

    for entry in existing {
        match entry_identity_key(kind, entry) {
            Some(key) => {
                if let Some(updated) = incoming_by_key.get(&key) {
                    merged.push((*updated).clone());
                    consumed.push(key);
                } else {
                    merged.push(entry.clone());
                }
            }
            None => merged.push(entry.clone()),
        }
    }

    for entry in incoming {
        match entry_identity_key(kind, entry) {
            Some(key) if consumed.contains(&key) => {}
            Some(key) => {
                // The map holds the last occurrence, so duplicate keys within
                // one batch collapse to their final value.
                let latest = incoming_by_key.get(&key).copied().unwrap_or(entry);
                merged.push(latest.clone());
                consumed.push(key);
            }
            None => merged.push(entry.clone()),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn updated_entry_keeps_its_position() {
        let existing = vec![
            json!({"id": "a", "v": 1}),
            json!({"id": "b", "v": 1}),
            json!({"id": "c", "v": 1}),
        ];
        let incoming = vec![json!({"id": "b", "v": 2})];
        let merged = merge_entries(&existing, &incoming, EntryKind::Reasoning);
        assert_eq!(
            merged,
            vec![
                json!({"id": "a", "v": 1}),
                json!({"id": "b", "v": 2}),
                json!({"id": "c", "v": 1}),
            ]
        );
    }

    #[test]
    fn new_entries_append_in_incoming_order() {
        let existing = vec![json!({"id": "a", "v": 1})];
        let incoming = vec![json!({"id": "x", "v": 1}), json!({"id": "y", "v": 1})];
        let merged = merge_entries(&existing, &incoming, EntryKind::Response);
        let ids: Vec<&str> = merged.iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "x", "y"]);
    }

    #[test]
    fn merge_into_empty_is_identity() {
        let incoming = vec![json!({"id": "only", "v": 1})];
        let merged = merge_entries(&[], &incoming, EntryKind::Reasoning);
        assert_eq!(merged, incoming);
    }

    #[test]
    fn duplicate_keys_within_incoming_collapse_to_last() {
        let incoming = vec![json!({"id": "a", "v": 1}), json!({"id": "a", "v": 2})];
        let merged = merge_entries(&[], &incoming, EntryKind::Reasoning);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["v"], json!(2));
    }

    #[test]
    fn raw_llm_identity_uses_role_and_sorted_tool_call_ids() {
        let turn = json!({
            "role": "assistant",
            "content": [
                {"type": "tool-call", "toolCallId": "call-2"},
                {"type": "tool-call", "toolCallId": "call-1"}
            ]
        });
        let key = entry_identity_key(EntryKind::RawLlm, &turn).unwrap();
        assert_eq!(key, "assistant:call-1,call-2");
    }

    #[test]
    fn raw_llm_turn_upserts_by_tool_call_identity() {
        let existing = vec![json!({
            "role": "assistant",
            "content": [{"type": "tool-call", "toolCallId": "call-1", "args": {}}]
        })];
        let incoming = vec![json!({
            "role": "assistant",
            "content": [{"type": "tool-call", "toolCallId": "call-1", "args": {"done": true}}]
        })];
        let merged = merge_entries(&existing, &incoming, EntryKind::RawLlm);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["content"][0]["args"]["done"], json!(true));
    }

    #[test]
    fn raw_llm_without_tool_calls_uses_content_digest() {
        let a = json!({"role": "assistant", "content": "hello"});
        let b = json!({"role": "assistant", "content": "hello"});
        let c = json!({"role": "assistant", "content": "different"});
        assert_eq!(
            entry_identity_key(EntryKind::RawLlm, &a),
            entry_identity_key(EntryKind::RawLlm, &b)
        );
        assert_ne!(
            entry_identity_key(EntryKind::RawLlm, &a),
            entry_identity_key(EntryKind::RawLlm, &c)
        );
    }

    #[test]
    fn keyless_entries_are_always_new() {
        let existing = vec![json!({"note": "no id"})];
        let incoming = vec![json!({"note": "no id"})];
        let merged = merge_entries(&existing, &incoming, EntryKind::Reasoning);
        assert_eq!(merged.len(), 2);
    }
}
