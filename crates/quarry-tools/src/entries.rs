//! Builders for the message entries tools publish while streaming.
//!
//! Reasoning entries mirror the reconciler's item view to the UI; response
//! entries announce committed files; raw LLM entries replay the tool call and
//! its result for conversation history. Reasoning and response entries carry
//! an `id` the merge upserts on; raw LLM entries are identified by role plus
//! the tool-call ids inside their content.

use serde_json::{json, Map, Value};

use quarry_types::{AssetKind, FileResult, ItemStatus, ToolContext};

use crate::reconciler::ToolCallState;

pub fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Loading => "loading",
        ItemStatus::Processing => "processing",
        ItemStatus::Completed => "completed",
        ItemStatus::Failed => "failed",
    }
}

/// Reasoning entry describing every sub-item of a call. Upserted on the
/// tool-call id, so successive deltas replace the previous view in place.
pub fn reasoning_entry(
    state: &ToolCallState,
    kind: AssetKind,
    title: &str,
    status: ItemStatus,
) -> Value {
    let mut file_ids = Vec::new();
    let mut files = Map::new();
    for (index, item) in &state.items {
        let key = item
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{index}", state.tool_call_id));
        file_ids.push(Value::String(key.clone()));
        files.insert(
            key,
            json!({
                "id": item.id,
                "file_type": kind.file_type(),
                "file_name": item.name,
                "version_number": item.version_number,
                "status": status_label(item.status),
                "error": item.error,
                "file": { "text": item.content.clone().unwrap_or_default() },
            }),
        );
    }
    json!({
        "id": state.tool_call_id,
        "type": "files",
        "title": title,
        "status": status_label(status),
        "file_ids": file_ids,
        "files": files,
    })
}

/// Response entry announcing one committed file to the conversation.
pub fn response_file_entry(file: &FileResult, kind: AssetKind) -> Value {
    json!({
        "id": file.id,
        "type": "file",
        "file_type": kind.file_type(),
        "file_name": file.name,
        "version_number": file.version_number,
    })
}

/// Raw LLM replay of the assistant's tool call.
pub fn raw_tool_call_entry(call_id: &str, tool_name: &str, input: &Value) -> Value {
    json!({
        "role": "assistant",
        "content": [{
            "type": "tool-call",
            "toolCallId": call_id,
            "toolName": tool_name,
            "input": input,
        }],
    })
}

/// Raw LLM entry carrying the tool's result payload.
pub fn raw_tool_result_entry(call_id: &str, tool_name: &str, output: &Value) -> Value {
    json!({
        "role": "tool",
        "content": [{
            "type": "tool-result",
            "toolCallId": call_id,
            "toolName": tool_name,
            "output": output,
        }],
    })
}

/// Turn an execute-path failure into a message the LLM can act on. Auth and
/// infrastructure failures get stable phrasings instead of leaking internals.
pub fn classify_execute_error(error: &str, context: &ToolContext) -> String {
    let lower = error.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("permission") {
        format!(
            "You do not have permission to perform this action in organization {}.",
            context.organization_id
        )
    } else if lower.contains("not found") {
        error.to_string()
    } else if lower.contains("io error") || lower.contains("serialization") {
        format!("Failed to save to database: {error}")
    } else {
        error.to_string()
    }
}
