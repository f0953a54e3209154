//! Batched create/modify tools for metric and dashboard files.
//!
//! One tool instance serves one (kind, mode) pair. Sub-items are independent:
//! a file that fails validation or commit lands in `failed_files` while the
//! rest of the batch proceeds.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use quarry_edit::ModifyOutcome;
use quarry_types::{
    AssetKind, FailedFile, FileBatchOutput, FileResult, ItemStatus, MessageEntryUpdate,
    ToolContext, ToolOutput,
};

use crate::entries::{
    classify_execute_error, raw_tool_call_entry, raw_tool_result_entry, reasoning_entry,
    response_file_entry,
};
use crate::lifecycle::{
    StreamingTool, ToolDeps, CREATE_DASHBOARDS_TOOL_NAME, CREATE_METRICS_TOOL_NAME,
    MODIFY_DASHBOARDS_TOOL_NAME, MODIFY_METRICS_TOOL_NAME,
};
use crate::reconciler::{CallTracker, ItemOutcome, FILE_FIELDS};
use crate::retry::validate_with_retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchMode {
    Create,
    Modify,
}

pub struct FileBatchTool {
    kind: AssetKind,
    mode: BatchMode,
    deps: ToolDeps,
    tracker: CallTracker,
}

impl FileBatchTool {
    pub fn create(kind: AssetKind, deps: ToolDeps) -> Self {
        Self {
            kind,
            mode: BatchMode::Create,
            deps,
            tracker: CallTracker::new(),
        }
    }

    pub fn modify(kind: AssetKind, deps: ToolDeps) -> Self {
        Self {
            kind,
            mode: BatchMode::Modify,
            deps,
            tracker: CallTracker::new(),
        }
    }

    fn title(&self, status: ItemStatus) -> String {
        let noun = format!("{} files", self.kind.as_str());
        match (self.mode, status) {
            (BatchMode::Create, ItemStatus::Completed) => format!("Created {noun}"),
            (BatchMode::Create, ItemStatus::Failed) => format!("Failed to create {noun}"),
            (BatchMode::Create, _) => format!("Creating {noun}..."),
            (BatchMode::Modify, ItemStatus::Completed) => format!("Modified {noun}"),
            (BatchMode::Modify, ItemStatus::Failed) => format!("Failed to modify {noun}"),
            (BatchMode::Modify, _) => format!("Modifying {noun}..."),
        }
    }

    fn sequence_key(&self, context: &ToolContext) -> String {
        context.message_id.clone().unwrap_or_default()
    }

    async fn publish_state(&self, call_id: &str, context: &ToolContext, status: ItemStatus) {
        let Some(state) = self.tracker.snapshot(call_id) else {
            return;
        };
        let entry = reasoning_entry(&state, self.kind, &self.title(status), status);
        self.deps
            .publish_progress(
                &self.sequence_key(context),
                context,
                MessageEntryUpdate::reasoning(entry),
            )
            .await;
    }

    async fn commit_one(
        &self,
        index: usize,
        element: &Value,
        call_id: &str,
        context: &ToolContext,
    ) -> Result<FileResult, (String, String)> {
        let name = element
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let content = element.get("yml_content").and_then(Value::as_str).unwrap_or("");

        match self.mode {
            BatchMode::Create => {
                if name.is_empty() || content.is_empty() {
                    let label = if name.is_empty() { "unknown".to_string() } else { name };
                    return Err((label, "Missing required file properties".to_string()));
                }
                if self.kind == AssetKind::Metric {
                    if let Err(err) =
                        validate_with_retry(self.deps.validator.as_ref(), content).await
                    {
                        return Err((
                            name,
                            format!("The SQL query has an issue: {err}. Please check your query syntax."),
                        ));
                    }
                }
                // Reuse the id assigned during streaming so the UI entry and
                // the committed row agree.
                let id = self
                    .tracker
                    .with_state(call_id, |state| {
                        state.items.get(&index).and_then(|item| item.id.clone())
                    })
                    .flatten()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                match self
                    .deps
                    .engine
                    .commit_initial(&id, &name, content, self.kind, context)
                    .await
                {
                    Ok(committed) => Ok(FileResult {
                        id: committed.id,
                        name: committed.name,
                        content: Some(committed.content),
                        version_number: committed.version_number,
                        updated_at: Some(committed.updated_at),
                    }),
                    Err(err) => Err((name, classify_execute_error(&err.to_string(), context))),
                }
            }
            BatchMode::Modify => {
                let id = element.get("id").and_then(Value::as_str).unwrap_or("");
                let label = if name.is_empty() { id.to_string() } else { name.clone() };
                if id.is_empty() || content.is_empty() {
                    return Err((label, "Missing required file properties".to_string()));
                }
                if self.kind == AssetKind::Metric {
                    if let Err(err) =
                        validate_with_retry(self.deps.validator.as_ref(), content).await
                    {
                        return Err((
                            label,
                            format!("The SQL query has an issue: {err}. Please check your query syntax."),
                        ));
                    }
                }
                let new_name = (!name.is_empty()).then_some(name);
                match self
                    .deps
                    .engine
                    .replace_content(id, new_name, content, context)
                    .await
                {
                    Ok(ModifyOutcome::Committed(committed)) => Ok(FileResult {
                        id: committed.id,
                        name: committed.name,
                        content: Some(committed.content),
                        version_number: committed.version_number,
                        updated_at: Some(committed.updated_at),
                    }),
                    Ok(ModifyOutcome::NotFound { document_id }) => {
                        Err((label, format!("Document not found: {document_id}")))
                    }
                    Ok(ModifyOutcome::EditRejected { message, .. }) => Err((label, message)),
                    Err(err) => Err((label, classify_execute_error(&err.to_string(), context))),
                }
            }
        }
    }

    fn result_message(&self, files: &[FileResult], failed: &[FailedFile]) -> String {
        let (past, base) = match self.mode {
            BatchMode::Create => ("created", "create"),
            BatchMode::Modify => ("modified", "modify"),
        };
        let noun = format!("{} files", self.kind.as_str());
        if failed.is_empty() {
            return format!("Successfully {past} {} {noun}.", files.len());
        }
        let mut message = String::new();
        if !files.is_empty() {
            message.push_str(&format!("Successfully {past} {} {noun}. ", files.len()));
        }
        if failed.len() == 1 {
            message.push_str(&format!(
                "Failed to {base} '{}': {}.",
                failed[0].name, failed[0].error
            ));
        } else {
            message.push_str(&format!("Failed to {base} {} {noun}:\n", failed.len()));
            let failures: Vec<String> = failed
                .iter()
                .map(|f| format!("Failed to {base} '{}': {}", f.name, f.error))
                .collect();
            message.push_str(&failures.join("\n"));
        }
        message
    }
}

#[async_trait]
impl StreamingTool for FileBatchTool {
    fn name(&self) -> &'static str {
        match (self.mode, self.kind) {
            (BatchMode::Create, AssetKind::Metric) => CREATE_METRICS_TOOL_NAME,
            (BatchMode::Modify, AssetKind::Metric) => MODIFY_METRICS_TOOL_NAME,
            (BatchMode::Create, _) => CREATE_DASHBOARDS_TOOL_NAME,
            (BatchMode::Modify, _) => MODIFY_DASHBOARDS_TOOL_NAME,
        }
    }

    async fn on_start(&self, call_id: &str, context: &ToolContext) {
        self.tracker.start(call_id);
        self.publish_state(call_id, context, ItemStatus::Loading).await;
    }

    async fn on_delta(&self, call_id: &str, chunk: &str, context: &ToolContext) {
        let changed = self
            .tracker
            .with_state(call_id, |state| state.ingest_delta(chunk, &FILE_FIELDS))
            .unwrap_or(false);
        if changed {
            self.publish_state(call_id, context, ItemStatus::Loading).await;
        }
    }

    async fn on_input_available(&self, call_id: &str, input: &Value, context: &ToolContext) {
        self.tracker.with_state(call_id, |state| {
            state.apply_validated(input, &FILE_FIELDS);
        });
        self.publish_state(call_id, context, ItemStatus::Processing).await;
    }

    async fn execute(&self, call_id: &str, input: Value, context: &ToolContext) -> ToolOutput {
        let elements = input
            .get("files")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut files = Vec::new();
        let mut failed_files = Vec::new();
        for (index, element) in elements.iter().enumerate() {
            match self.commit_one(index, element, call_id, context).await {
                Ok(result) => files.push(result),
                Err((name, error)) => failed_files.push(FailedFile { name, error }),
            }
        }

        let fallback = if failed_files.is_empty() {
            ItemStatus::Completed
        } else {
            ItemStatus::Failed
        };
        let mut outcomes: Vec<ItemOutcome> = files
            .iter()
            .map(|file| ItemOutcome {
                name: Some(file.name.clone()),
                id: Some(file.id.clone()),
                version_number: Some(file.version_number),
                status: ItemStatus::Completed,
                error: None,
            })
            .collect();
        outcomes.extend(failed_files.iter().map(|failure| ItemOutcome {
            name: Some(failure.name.clone()),
            id: None,
            version_number: None,
            status: ItemStatus::Failed,
            error: Some(failure.error.clone()),
        }));
        self.tracker.with_state(call_id, |state| {
            state.finalize(&outcomes, fallback);
        });

        let output = FileBatchOutput {
            message: self.result_message(&files, &failed_files),
            files: files.clone(),
            failed_files,
        };

        if let Some(state) = self.tracker.snapshot(call_id) {
            let reasoning = reasoning_entry(&state, self.kind, &self.title(fallback), fallback);
            let output_value = serde_json::to_value(&output).unwrap_or_default();
            let update = MessageEntryUpdate {
                reasoning: vec![reasoning],
                raw_llm: vec![
                    raw_tool_call_entry(call_id, self.name(), &input),
                    raw_tool_result_entry(call_id, self.name(), &output_value),
                ],
                response: files
                    .iter()
                    .map(|file| response_file_entry(file, self.kind))
                    .collect(),
            };
            self.deps
                .publish_progress(&self.sequence_key(context), context, update)
                .await;
        }
        self.tracker.remove(call_id);

        ToolOutput::FileBatch(output)
    }
}
