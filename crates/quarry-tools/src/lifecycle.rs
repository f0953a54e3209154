//! Tool lifecycle surface consumed by the hosting LLM runtime.
//!
//! The runtime drives each call through start → deltas → input-available →
//! execute; the registry routes those hooks to the named tool. Tools never
//! invoke the hooks themselves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::Level;

use quarry_edit::EditEngine;
use quarry_observability::{emit_event, ObservabilityEvent};
use quarry_store::{DocumentStore, MessageStore, WriteSequencer};
use quarry_types::{AssetKind, FailureOutput, MessageEntryUpdate, ToolContext, ToolOutput};

use crate::file_tools::FileBatchTool;
use crate::report_tools::{CreateReportTool, ModifyReportTool};
use crate::retry::SqlValidator;

pub const CREATE_METRICS_TOOL_NAME: &str = "create_metrics";
pub const MODIFY_METRICS_TOOL_NAME: &str = "modify_metrics";
pub const CREATE_DASHBOARDS_TOOL_NAME: &str = "create_dashboards";
pub const MODIFY_DASHBOARDS_TOOL_NAME: &str = "modify_dashboards";
pub const CREATE_REPORTS_TOOL_NAME: &str = "create_reports";
pub const MODIFY_REPORTS_TOOL_NAME: &str = "modify_reports";

/// Combined persistence boundary a tool needs: document rows plus the
/// conversation row.
pub trait Backend: DocumentStore + MessageStore {}

impl<T: DocumentStore + MessageStore> Backend for T {}

/// Shared collaborators handed to every tool at construction.
#[derive(Clone)]
pub struct ToolDeps {
    pub store: Arc<dyn Backend>,
    pub engine: Arc<EditEngine>,
    pub sequencer: Arc<WriteSequencer>,
    pub validator: Arc<dyn SqlValidator>,
}

impl ToolDeps {
    /// Publish a progress update through the per-document write chain.
    /// Failures are logged inside the chain and swallowed: reasoning-stream
    /// visibility must never abort the tool execution.
    pub async fn publish_progress(
        &self,
        sequence_key: &str,
        context: &ToolContext,
        update: MessageEntryUpdate,
    ) {
        let Some(message_id) = context.message_id.clone() else {
            return;
        };
        if update.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        let write = async move {
            store.merge_message_entries(&message_id, update).await?;
            Ok(())
        };
        self.sequencer.track(sequence_key, write).await;
    }
}

/// One streaming tool. Hooks other than `execute` are best-effort: they
/// update in-memory state and publish progress, and must not fail the call.
#[async_trait]
pub trait StreamingTool: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_start(&self, call_id: &str, context: &ToolContext);

    async fn on_delta(&self, call_id: &str, chunk: &str, context: &ToolContext);

    async fn on_input_available(&self, call_id: &str, input: &Value, context: &ToolContext);

    async fn execute(&self, call_id: &str, input: Value, context: &ToolContext) -> ToolOutput;
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn StreamingTool>>>>,
}

impl ToolRegistry {
    pub fn new(deps: ToolDeps) -> Self {
        let mut map: HashMap<String, Arc<dyn StreamingTool>> = HashMap::new();
        map.insert(
            CREATE_METRICS_TOOL_NAME.to_string(),
            Arc::new(FileBatchTool::create(AssetKind::Metric, deps.clone())),
        );
        map.insert(
            MODIFY_METRICS_TOOL_NAME.to_string(),
            Arc::new(FileBatchTool::modify(AssetKind::Metric, deps.clone())),
        );
        map.insert(
            CREATE_DASHBOARDS_TOOL_NAME.to_string(),
            Arc::new(FileBatchTool::create(AssetKind::Dashboard, deps.clone())),
        );
        map.insert(
            MODIFY_DASHBOARDS_TOOL_NAME.to_string(),
            Arc::new(FileBatchTool::modify(AssetKind::Dashboard, deps.clone())),
        );
        map.insert(
            CREATE_REPORTS_TOOL_NAME.to_string(),
            Arc::new(CreateReportTool::new(deps.clone())),
        );
        map.insert(
            MODIFY_REPORTS_TOOL_NAME.to_string(),
            Arc::new(ModifyReportTool::new(deps)),
        );
        Self {
            tools: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn on_start(&self, name: &str, call_id: &str, context: &ToolContext) {
        if let Some(tool) = self.get(name).await {
            tool.on_start(call_id, context).await;
        }
    }

    pub async fn on_delta(&self, name: &str, call_id: &str, chunk: &str, context: &ToolContext) {
        if let Some(tool) = self.get(name).await {
            tool.on_delta(call_id, chunk, context).await;
        }
    }

    pub async fn on_input_available(
        &self,
        name: &str,
        call_id: &str,
        input: &Value,
        context: &ToolContext,
    ) {
        if let Some(tool) = self.get(name).await {
            tool.on_input_available(call_id, input, context).await;
        }
    }

    pub async fn execute(
        &self,
        name: &str,
        call_id: &str,
        input: Value,
        context: &ToolContext,
    ) -> ToolOutput {
        let Some(tool) = self.get(name).await else {
            emit_event(
                Level::WARN,
                ObservabilityEvent {
                    event: "tool_execute",
                    component: "tool_registry",
                    tool_name: Some(name),
                    call_id: Some(call_id),
                    message_id: context.message_id.as_deref(),
                    document_id: None,
                    organization_id: Some(&context.organization_id),
                    status: Some("failed"),
                    error_code: Some("unknown_tool"),
                    detail: None,
                },
            );
            return ToolOutput::Failure(FailureOutput {
                message: format!("Unknown tool: {name}"),
                error: "unknown_tool".to_string(),
            });
        };
        let output = tool.execute(call_id, input, context).await;
        let (level, status) = if output.is_failure() {
            (Level::WARN, "failed")
        } else {
            (Level::INFO, "completed")
        };
        emit_event(
            level,
            ObservabilityEvent {
                event: "tool_execute",
                component: "tool_registry",
                tool_name: Some(name),
                call_id: Some(call_id),
                message_id: context.message_id.as_deref(),
                document_id: None,
                organization_id: Some(&context.organization_id),
                status: Some(status),
                error_code: None,
                detail: None,
            },
        );
        output
    }

    async fn get(&self, name: &str) -> Option<Arc<dyn StreamingTool>> {
        self.tools.read().await.get(name).cloned()
    }
}
