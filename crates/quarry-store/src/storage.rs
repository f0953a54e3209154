use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::RwLock;

use quarry_types::{AssetDocument, MessageEntryUpdate};

use crate::boundary::{
    DocumentStore, DocumentWrite, FileAssociation, MessageStore, StoreError, StoreResult,
    StoredMessage,
};
use crate::merge::{merge_entries, EntryKind};

const DOCUMENTS_FILE: &str = "documents.json";
const MESSAGES_FILE: &str = "messages.json";
const METRIC_LINKS_FILE: &str = "metric_links.json";
const ASSOCIATIONS_FILE: &str = "file_associations.json";

/// Default persistence boundary: JSON files under a base directory, fronted
/// by in-memory maps. Every mutation happens under the write lock and is
/// flushed through before the lock is released, so a single `Storage` gives
/// the atomic read-modify-write the message merge requires.
pub struct Storage {
    base: PathBuf,
    documents: RwLock<HashMap<String, AssetDocument>>,
    messages: RwLock<HashMap<String, StoredMessage>>,
    metric_links: RwLock<HashMap<String, Vec<String>>>,
    associations: RwLock<HashMap<String, Vec<FileAssociation>>>,
}

impl Storage {
    pub async fn new(base: impl AsRef<Path>) -> StoreResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;

        let documents = load_map(&base.join(DOCUMENTS_FILE)).await;
        let messages = load_map(&base.join(MESSAGES_FILE)).await;
        let metric_links = load_map(&base.join(METRIC_LINKS_FILE)).await;
        let associations = load_map(&base.join(ASSOCIATIONS_FILE)).await;

        Ok(Self {
            base,
            documents: RwLock::new(documents),
            messages: RwLock::new(messages),
            metric_links: RwLock::new(metric_links),
            associations: RwLock::new(associations),
        })
    }

    async fn persist<T: serde::Serialize>(
        &self,
        file: &str,
        data: &HashMap<String, T>,
    ) -> StoreResult<()> {
        let raw = serde_json::to_string_pretty(data)?;
        fs::write(self.base.join(file), raw).await?;
        Ok(())
    }

    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn metric_links_for(&self, report_id: &str) -> Vec<String> {
        self.metric_links
            .read()
            .await
            .get(report_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn associations_for(&self, message_id: &str) -> Vec<FileAssociation> {
        self.associations
            .read()
            .await
            .get(message_id)
            .cloned()
            .unwrap_or_default()
    }
}

async fn load_map<T: serde::de::DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    match fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn read_document(&self, id: &str) -> StoreResult<Option<AssetDocument>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn create_document(&self, document: AssetDocument) -> StoreResult<()> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id.clone(), document);
        self.persist(DOCUMENTS_FILE, &documents).await
    }

    async fn write_document(&self, id: &str, write: DocumentWrite) -> StoreResult<()> {
        let mut documents = self.documents.write().await;
        let Some(document) = documents.get_mut(id) else {
            return Err(StoreError::DocumentNotFound(id.to_string()));
        };
        document.content = write.content;
        if let Some(name) = write.name {
            document.name = name;
        }
        document.version_history = write.version_history;
        document.updated_at = write.updated_at;
        self.persist(DOCUMENTS_FILE, &documents).await
    }

    async fn upsert_metric_links(&self, report_id: &str, metric_ids: &[String]) -> StoreResult<()> {
        let mut links = self.metric_links.write().await;
        links.insert(report_id.to_string(), metric_ids.to_vec());
        self.persist(METRIC_LINKS_FILE, &links).await
    }

    async fn track_file_associations(
        &self,
        message_id: &str,
        files: &[FileAssociation],
    ) -> StoreResult<()> {
        let mut associations = self.associations.write().await;
        let entry = associations.entry(message_id.to_string()).or_default();
        for file in files {
            match entry.iter_mut().find(|a| a.file_id == file.file_id) {
                Some(existing) => existing.version_number = file.version_number,
                None => entry.push(file.clone()),
            }
        }
        self.persist(ASSOCIATIONS_FILE, &associations).await
    }
}

#[async_trait]
impl MessageStore for Storage {
    async fn merge_message_entries(
        &self,
        message_id: &str,
        update: MessageEntryUpdate,
    ) -> StoreResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut messages = self.messages.write().await;
        let message = messages
            .entry(message_id.to_string())
            .or_insert_with(|| StoredMessage {
                id: message_id.to_string(),
                updated_at: Utc::now(),
                ..Default::default()
            });

        if !update.reasoning.is_empty() {
            message.reasoning =
                merge_entries(&message.reasoning, &update.reasoning, EntryKind::Reasoning);
        }
        if !update.raw_llm.is_empty() {
            message.raw_llm = merge_entries(&message.raw_llm, &update.raw_llm, EntryKind::RawLlm);
        }
        if !update.response.is_empty() {
            message.response =
                merge_entries(&message.response, &update.response, EntryKind::Response);
        }
        message.updated_at = Utc::now();

        self.persist(MESSAGES_FILE, &messages).await
    }

    async fn read_message(&self, message_id: &str) -> StoreResult<Option<StoredMessage>> {
        Ok(self.messages.read().await.get(message_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_types::{AssetKind, VersionHistory};
    use serde_json::json;
    use tempfile::TempDir;

    fn document(id: &str) -> AssetDocument {
        let now = Utc::now();
        AssetDocument {
            id: id.to_string(),
            name: "Revenue Report".to_string(),
            kind: AssetKind::Report,
            content: "# Revenue".to_string(),
            version_history: VersionHistory::initial("# Revenue", now),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn documents_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let storage = Storage::new(tmp.path()).await.unwrap();
            storage.create_document(document("doc-1")).await.unwrap();
        }
        let storage = Storage::new(tmp.path()).await.unwrap();
        let loaded = storage.read_document("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Revenue Report");
        assert_eq!(loaded.version_history.latest_version_number(), 1);
    }

    #[tokio::test]
    async fn write_document_requires_existing_row() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path()).await.unwrap();
        let write = DocumentWrite {
            content: "new".to_string(),
            name: None,
            version_history: VersionHistory::default(),
            updated_at: Utc::now(),
        };
        let err = storage.write_document("missing", write).await.unwrap_err();
        assert!(matches!(err, StoreError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn write_document_replaces_content_and_history() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path()).await.unwrap();
        storage.create_document(document("doc-1")).await.unwrap();

        let mut history = VersionHistory::initial("# Revenue", Utc::now());
        history.push_version("# Revenue v2", Utc::now());
        let write = DocumentWrite {
            content: "# Revenue v2".to_string(),
            name: Some("Revenue Report v2".to_string()),
            version_history: history,
            updated_at: Utc::now(),
        };
        storage.write_document("doc-1", write).await.unwrap();

        let loaded = storage.read_document("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.content, "# Revenue v2");
        assert_eq!(loaded.name, "Revenue Report v2");
        assert_eq!(loaded.version_history.latest_version_number(), 2);
    }

    #[tokio::test]
    async fn merge_message_entries_upserts_by_id() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path()).await.unwrap();

        storage
            .merge_message_entries(
                "msg-1",
                MessageEntryUpdate {
                    reasoning: vec![json!({"id": "r1", "status": "loading"})],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        storage
            .merge_message_entries(
                "msg-1",
                MessageEntryUpdate {
                    reasoning: vec![json!({"id": "r1", "status": "completed"})],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let message = storage.read_message("msg-1").await.unwrap().unwrap();
        assert_eq!(message.reasoning.len(), 1);
        assert_eq!(message.reasoning[0]["status"], json!("completed"));
    }

    #[tokio::test]
    async fn empty_update_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path()).await.unwrap();
        storage
            .merge_message_entries("msg-1", MessageEntryUpdate::default())
            .await
            .unwrap();
        assert!(storage.read_message("msg-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metric_links_replace_previous_set() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path()).await.unwrap();
        storage
            .upsert_metric_links("rep-1", &["m-1".to_string(), "m-2".to_string()])
            .await
            .unwrap();
        storage
            .upsert_metric_links("rep-1", &["m-2".to_string()])
            .await
            .unwrap();
        assert_eq!(storage.metric_links_for("rep-1").await, vec!["m-2"]);
    }

    #[tokio::test]
    async fn file_associations_upsert_version() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path()).await.unwrap();
        storage
            .track_file_associations(
                "msg-1",
                &[FileAssociation {
                    file_id: "doc-1".to_string(),
                    version_number: 1,
                }],
            )
            .await
            .unwrap();
        storage
            .track_file_associations(
                "msg-1",
                &[FileAssociation {
                    file_id: "doc-1".to_string(),
                    version_number: 2,
                }],
            )
            .await
            .unwrap();
        let associations = storage.associations_for("msg-1").await;
        assert_eq!(associations.len(), 1);
        assert_eq!(associations[0].version_number, 2);
    }
}
