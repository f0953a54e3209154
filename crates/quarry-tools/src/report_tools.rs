//! Single-document report tools.
//!
//! Reports stream as one large content field rather than an array of files.
//! Create materializes a draft row as soon as the name resolves and streams
//! content into it through the write sequencer; execute then commits the
//! validated input as the authoritative version 1. Modify applies an ordered
//! edit batch through the edit engine.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use quarry_json::get_optimistic_string;
use quarry_store::DocumentWrite;
use quarry_types::{
    AssetDocument, AssetKind, EditOperation, FailureOutput, FileResult, ItemStatus,
    MessageEntryUpdate, SingleFileOutput, ToolContext, ToolOutput, VersionHistory,
};

use crate::entries::{
    classify_execute_error, raw_tool_call_entry, raw_tool_result_entry, reasoning_entry,
    response_file_entry,
};
use crate::lifecycle::{
    StreamingTool, ToolDeps, CREATE_REPORTS_TOOL_NAME, MODIFY_REPORTS_TOOL_NAME,
};
use crate::reconciler::{CallTracker, ItemOutcome, EDIT_FIELDS};

pub struct CreateReportTool {
    deps: ToolDeps,
    tracker: CallTracker,
}

impl CreateReportTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self {
            deps,
            tracker: CallTracker::new(),
        }
    }

    async fn publish_state(
        &self,
        call_id: &str,
        context: &ToolContext,
        title: &str,
        status: ItemStatus,
        response: Vec<Value>,
    ) {
        let Some(state) = self.tracker.snapshot(call_id) else {
            return;
        };
        let key = state
            .document_id
            .clone()
            .or_else(|| context.message_id.clone())
            .unwrap_or_default();
        let update = MessageEntryUpdate {
            reasoning: vec![reasoning_entry(&state, AssetKind::Report, title, status)],
            raw_llm: Vec::new(),
            response,
        };
        self.deps.publish_progress(&key, context, update).await;
    }
}

#[async_trait]
impl StreamingTool for CreateReportTool {
    fn name(&self) -> &'static str {
        CREATE_REPORTS_TOOL_NAME
    }

    async fn on_start(&self, call_id: &str, _context: &ToolContext) {
        self.tracker.start(call_id);
        self.tracker.with_state(call_id, |state| {
            state.document_id = Some(Uuid::new_v4().to_string());
        });
    }

    async fn on_delta(&self, call_id: &str, chunk: &str, context: &ToolContext) {
        // Reconcile the single (name, content) pair into item 0.
        let Some((changed, doc_id, name, content, create_draft)) =
            self.tracker.with_state(call_id, |state| {
                state.accumulated_text.push_str(chunk);
                let parsed = quarry_json::parse(&state.accumulated_text);
                let name = get_optimistic_string(&parsed.extracted_values, "name", "");
                let content = get_optimistic_string(&parsed.extracted_values, "content", "");

                let item = state.items.entry(0).or_default();
                let mut changed = item.fill_name(&name);
                changed |= item.fill_content(&content);
                if item.content.is_some() && item.status == ItemStatus::Loading {
                    item.status = ItemStatus::Processing;
                    changed = true;
                }

                let create_draft = !state.initial_entries_created && !name.is_empty();
                if create_draft {
                    state.initial_entries_created = true;
                }
                (
                    changed,
                    state.document_id.clone().unwrap_or_default(),
                    name,
                    content,
                    create_draft,
                )
            })
        else {
            return;
        };
        if !changed {
            return;
        }

        let store = Arc::clone(&self.deps.store);
        if create_draft {
            // First time the name is known: materialize the draft row so the
            // UI can open the report while content is still streaming.
            let draft = AssetDocument {
                id: doc_id.clone(),
                name: name.clone(),
                kind: AssetKind::Report,
                content: content.clone(),
                version_history: VersionHistory::default(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let write = async move {
                store.create_document(draft).await?;
                Ok(())
            };
            self.deps.sequencer.track(&doc_id, write).await;

            self.tracker.with_state(call_id, |state| {
                state.items.entry(0).or_default().id = Some(doc_id.clone());
            });
            let response = vec![serde_json::json!({
                "id": doc_id,
                "type": "file",
                "file_type": AssetKind::Report.file_type(),
                "file_name": name,
            })];
            self.publish_state(call_id, context, "Creating report...", ItemStatus::Loading, response)
                .await;
        } else if !content.is_empty() {
            // Stream the partial content into the draft row.
            let id = doc_id.clone();
            let draft_content = content.clone();
            let write = async move {
                store
                    .write_document(
                        &id,
                        DocumentWrite {
                            content: draft_content.clone(),
                            name: None,
                            version_history: VersionHistory::initial(draft_content, Utc::now()),
                            updated_at: Utc::now(),
                        },
                    )
                    .await?;
                Ok(())
            };
            self.deps.sequencer.track(&doc_id, write).await;
            self.publish_state(call_id, context, "Creating report...", ItemStatus::Loading, Vec::new())
                .await;
        }
    }

    async fn on_input_available(&self, call_id: &str, input: &Value, _context: &ToolContext) {
        self.tracker.with_state(call_id, |state| {
            let item = state.items.entry(0).or_default();
            if let Some(name) = input.get("name").and_then(Value::as_str) {
                item.name = Some(name.to_string());
            }
            if let Some(content) = input.get("content").and_then(Value::as_str) {
                item.content = Some(content.to_string());
            }
            item.status = item.status.advance(ItemStatus::Processing);
        });
    }

    async fn execute(&self, call_id: &str, input: Value, context: &ToolContext) -> ToolOutput {
        let state_name = self
            .tracker
            .with_state(call_id, |state| {
                state.items.get(&0).and_then(|item| item.name.clone())
            })
            .flatten();
        let name = input
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(state_name)
            .unwrap_or_else(|| "Untitled Report".to_string());
        let content = input.get("content").and_then(Value::as_str).unwrap_or("");
        let doc_id = self
            .tracker
            .with_state(call_id, |state| state.document_id.clone())
            .flatten()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let result = self
            .deps
            .engine
            .commit_initial(&doc_id, &name, content, AssetKind::Report, context)
            .await;

        let output = match result {
            Ok(committed) => {
                let file = FileResult {
                    id: committed.id.clone(),
                    name: committed.name.clone(),
                    content: Some(committed.content),
                    version_number: committed.version_number,
                    updated_at: Some(committed.updated_at),
                };
                self.tracker.with_state(call_id, |state| {
                    state.finalize(
                        &[ItemOutcome {
                            name: Some(committed.name.clone()),
                            id: Some(committed.id.clone()),
                            version_number: Some(committed.version_number),
                            status: ItemStatus::Completed,
                            error: None,
                        }],
                        ItemStatus::Completed,
                    );
                });
                let response = vec![response_file_entry(&file, AssetKind::Report)];
                self.publish_state(call_id, context, "Created report", ItemStatus::Completed, response)
                    .await;
                ToolOutput::SingleFile(SingleFileOutput {
                    success: true,
                    message: format!("Successfully created report '{name}'."),
                    file,
                    error: None,
                })
            }
            Err(err) => {
                let message = classify_execute_error(&err.to_string(), context);
                self.tracker.with_state(call_id, |state| {
                    state.finalize(
                        &[ItemOutcome {
                            name: Some(name.clone()),
                            status: ItemStatus::Failed,
                            error: Some(message.clone()),
                            ..Default::default()
                        }],
                        ItemStatus::Failed,
                    );
                });
                self.publish_state(
                    call_id,
                    context,
                    "Failed to create report",
                    ItemStatus::Failed,
                    Vec::new(),
                )
                .await;
                ToolOutput::Failure(FailureOutput {
                    message,
                    error: err.to_string(),
                })
            }
        };

        let output_value = serde_json::to_value(&output).unwrap_or_default();
        let key = doc_id.clone();
        let raw_update = MessageEntryUpdate {
            reasoning: Vec::new(),
            raw_llm: vec![
                raw_tool_call_entry(call_id, self.name(), &input),
                raw_tool_result_entry(call_id, self.name(), &output_value),
            ],
            response: Vec::new(),
        };
        self.deps.publish_progress(&key, context, raw_update).await;

        self.deps.sequencer.wait_for_pending(&doc_id).await;
        self.deps.sequencer.clear(&doc_id);
        self.tracker.remove(call_id);
        output
    }
}

pub struct ModifyReportTool {
    deps: ToolDeps,
    tracker: CallTracker,
}

impl ModifyReportTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self {
            deps,
            tracker: CallTracker::new(),
        }
    }

    async fn publish_state(
        &self,
        call_id: &str,
        context: &ToolContext,
        title: &str,
        status: ItemStatus,
        response: Vec<Value>,
    ) {
        let Some(state) = self.tracker.snapshot(call_id) else {
            return;
        };
        let key = state
            .document_id
            .clone()
            .or_else(|| context.message_id.clone())
            .unwrap_or_default();
        let update = MessageEntryUpdate {
            reasoning: vec![reasoning_entry(&state, AssetKind::Report, title, status)],
            raw_llm: Vec::new(),
            response,
        };
        self.deps.publish_progress(&key, context, update).await;
    }
}

#[async_trait]
impl StreamingTool for ModifyReportTool {
    fn name(&self) -> &'static str {
        MODIFY_REPORTS_TOOL_NAME
    }

    async fn on_start(&self, call_id: &str, _context: &ToolContext) {
        self.tracker.start(call_id);
    }

    async fn on_delta(&self, call_id: &str, chunk: &str, context: &ToolContext) {
        let changed = self
            .tracker
            .with_state(call_id, |state| {
                let changed = state.ingest_delta(chunk, &EDIT_FIELDS);
                if state.document_id.is_none() {
                    let parsed = quarry_json::parse(&state.accumulated_text);
                    let id = get_optimistic_string(&parsed.extracted_values, "id", "");
                    if !id.is_empty() {
                        state.document_id = Some(id);
                    }
                }
                changed
            })
            .unwrap_or(false);
        if changed {
            self.publish_state(call_id, context, "Modifying report...", ItemStatus::Loading, Vec::new())
                .await;
        }
    }

    async fn on_input_available(&self, call_id: &str, input: &Value, context: &ToolContext) {
        self.tracker.with_state(call_id, |state| {
            state.apply_validated(input, &EDIT_FIELDS);
            if let Some(id) = input.get("id").and_then(Value::as_str) {
                state.document_id = Some(id.to_string());
            }
        });
        self.publish_state(call_id, context, "Modifying report...", ItemStatus::Processing, Vec::new())
            .await;
    }

    async fn execute(&self, call_id: &str, input: Value, context: &ToolContext) -> ToolOutput {
        let document_id = input
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                self.tracker
                    .with_state(call_id, |state| state.document_id.clone())
                    .flatten()
            });
        let Some(document_id) = document_id else {
            self.tracker.remove(call_id);
            return ToolOutput::Failure(FailureOutput {
                message: "No report id was provided.".to_string(),
                error: "missing_id".to_string(),
            });
        };
        let name = input
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        // An absent or malformed batch is a structured failure, never an
        // empty batch that commits unchanged content.
        let edits: Vec<EditOperation> = match input.get("edits").cloned().map(serde_json::from_value)
        {
            Some(Ok(edits)) => edits,
            Some(Err(err)) => {
                self.tracker.remove(call_id);
                return ToolOutput::Failure(FailureOutput {
                    message: format!("The edits payload is invalid: {err}."),
                    error: "invalid_edits".to_string(),
                });
            }
            None => {
                self.tracker.remove(call_id);
                return ToolOutput::Failure(FailureOutput {
                    message: "No edits were provided.".to_string(),
                    error: "missing_edits".to_string(),
                });
            }
        };

        let result = self
            .deps
            .engine
            .modify(
                quarry_edit::ModifyRequest {
                    document_id: document_id.clone(),
                    name,
                    edits,
                    base: None,
                },
                context,
            )
            .await;

        let output = match result {
            Ok(quarry_edit::ModifyOutcome::Committed(committed)) => {
                let file = FileResult {
                    id: committed.id.clone(),
                    name: committed.name.clone(),
                    content: Some(committed.content),
                    version_number: committed.version_number,
                    updated_at: Some(committed.updated_at),
                };
                self.tracker.with_state(call_id, |state| {
                    state.finalize(&[], ItemStatus::Completed);
                });
                let response = vec![response_file_entry(&file, AssetKind::Report)];
                self.publish_state(call_id, context, "Modified report", ItemStatus::Completed, response)
                    .await;
                ToolOutput::SingleFile(SingleFileOutput {
                    success: true,
                    message: format!("Successfully modified report '{}'.", committed.name),
                    file,
                    error: None,
                })
            }
            Ok(quarry_edit::ModifyOutcome::EditRejected {
                content, message, ..
            }) => {
                // Partial content is returned for inspection, never persisted.
                let (doc_name, version_number) =
                    match self.deps.store.read_document(&document_id).await {
                        Ok(Some(document)) => (
                            document.name,
                            document.version_history.latest_version_number(),
                        ),
                        _ => (document_id.clone(), 0),
                    };
                self.tracker.with_state(call_id, |state| {
                    state.finalize(
                        &[ItemOutcome {
                            status: ItemStatus::Failed,
                            error: Some(message.clone()),
                            ..Default::default()
                        }],
                        ItemStatus::Failed,
                    );
                });
                self.publish_state(
                    call_id,
                    context,
                    "Failed to modify report",
                    ItemStatus::Failed,
                    Vec::new(),
                )
                .await;
                ToolOutput::SingleFile(SingleFileOutput {
                    success: false,
                    message: message.clone(),
                    file: FileResult {
                        id: document_id.clone(),
                        name: doc_name,
                        content: Some(content),
                        version_number,
                        updated_at: None,
                    },
                    error: Some(message),
                })
            }
            Ok(quarry_edit::ModifyOutcome::NotFound { document_id: id }) => {
                self.tracker.with_state(call_id, |state| {
                    state.finalize(&[], ItemStatus::Failed);
                });
                self.publish_state(
                    call_id,
                    context,
                    "Failed to modify report",
                    ItemStatus::Failed,
                    Vec::new(),
                )
                .await;
                ToolOutput::Failure(FailureOutput {
                    message: format!("Report not found: {id}"),
                    error: "not_found".to_string(),
                })
            }
            Err(err) => {
                let message = classify_execute_error(&err.to_string(), context);
                self.tracker.with_state(call_id, |state| {
                    state.finalize(&[], ItemStatus::Failed);
                });
                self.publish_state(
                    call_id,
                    context,
                    "Failed to modify report",
                    ItemStatus::Failed,
                    Vec::new(),
                )
                .await;
                ToolOutput::Failure(FailureOutput {
                    message,
                    error: err.to_string(),
                })
            }
        };

        let output_value = serde_json::to_value(&output).unwrap_or_default();
        let raw_update = MessageEntryUpdate {
            reasoning: Vec::new(),
            raw_llm: vec![
                raw_tool_call_entry(call_id, self.name(), &input),
                raw_tool_result_entry(call_id, self.name(), &output_value),
            ],
            response: Vec::new(),
        };
        self.deps
            .publish_progress(&document_id, context, raw_update)
            .await;

        self.deps.sequencer.wait_for_pending(&document_id).await;
        self.deps.sequencer.clear(&document_id);
        self.tracker.remove(call_id);
        output
    }
}
