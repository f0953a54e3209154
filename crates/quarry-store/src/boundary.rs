use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use quarry_types::{AssetDocument, MessageEntryUpdate, VersionHistory};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A single commit's worth of document changes. Content replacement and
/// version-history extension are applied as one atomic update.
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    pub content: String,
    pub name: Option<String>,
    pub version_history: VersionHistory,
    pub updated_at: DateTime<Utc>,
}

/// A committed file linked back to the message that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAssociation {
    pub file_id: String,
    pub version_number: u32,
}

/// Stored conversation row: three independently merged entry arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    #[serde(default)]
    pub reasoning: Vec<Value>,
    #[serde(default)]
    pub raw_llm: Vec<Value>,
    #[serde(default)]
    pub response: Vec<Value>,
    pub updated_at: DateTime<Utc>,
}

/// The transactional key-addressed document store the edit engine commits
/// through. Implementations must apply each `write_document` atomically.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_document(&self, id: &str) -> StoreResult<Option<AssetDocument>>;

    async fn create_document(&self, document: AssetDocument) -> StoreResult<()>;

    /// Replace content and extend version history in one update. Fails with
    /// `DocumentNotFound` when the row does not exist.
    async fn write_document(&self, id: &str, write: DocumentWrite) -> StoreResult<()>;

    /// Replace the set of metrics a report currently depends on.
    async fn upsert_metric_links(&self, report_id: &str, metric_ids: &[String]) -> StoreResult<()>;

    /// Record which asset versions a message produced.
    async fn track_file_associations(
        &self,
        message_id: &str,
        files: &[FileAssociation],
    ) -> StoreResult<()>;
}

/// Conversation-row persistence. `merge_message_entries` must be a single
/// read-modify-write so two concurrent deltas cannot clobber each other.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn merge_message_entries(
        &self,
        message_id: &str,
        update: MessageEntryUpdate,
    ) -> StoreResult<()>;

    async fn read_message(&self, message_id: &str) -> StoreResult<Option<StoredMessage>>;
}
