//! The versioned document edit engine.
//!
//! One `EditEngine` per process owns the commit path for every document:
//! base-content resolution, sequential edit application, the version-fold
//! decision, and the write-through snapshot cache update. Edit rejections and
//! missing documents are structured outcomes; store failures during commit
//! propagate, because reporting success on a failed write would corrupt
//! trust in document state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::Level;

use quarry_observability::{emit_event, redact_text, ObservabilityEvent};
use quarry_store::{
    DocumentStore, DocumentWrite, FileAssociation, SnapshotStore, StoreError, WriteSequencer,
};
use quarry_types::{
    AssetDocument, AssetKind, DocumentSnapshot, EditOperation, ToolContext, VersionHistory,
};

use crate::apply::{apply_edits, ApplyResult, EditFailure};
use crate::metric_refs::extract_metric_ids;

#[derive(Error, Debug)]
pub enum EditEngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A successfully committed document state.
#[derive(Debug, Clone)]
pub struct CommittedDocument {
    pub id: String,
    pub name: String,
    pub content: String,
    pub version_number: u32,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a modify call. Only `Committed` was persisted; a rejected
/// batch returns its partially applied content without committing it.
#[derive(Debug, Clone)]
pub enum ModifyOutcome {
    Committed(CommittedDocument),
    EditRejected {
        content: String,
        failure: EditFailure,
        message: String,
    },
    NotFound {
        document_id: String,
    },
}

pub struct ModifyRequest {
    pub document_id: String,
    pub name: Option<String>,
    pub edits: Vec<EditOperation>,
    /// Immutable snapshot captured earlier in the turn, if the caller has
    /// one. Takes precedence over both the cache and a fresh read.
    pub base: Option<DocumentSnapshot>,
}

pub struct EditEngine {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn SnapshotStore>,
    sequencer: Arc<WriteSequencer>,
}

impl EditEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn SnapshotStore>,
        sequencer: Arc<WriteSequencer>,
    ) -> Self {
        Self {
            store,
            cache,
            sequencer,
        }
    }

    pub fn sequencer(&self) -> Arc<WriteSequencer> {
        Arc::clone(&self.sequencer)
    }

    /// Apply an ordered edit batch to a document and commit the result.
    pub async fn modify(
        &self,
        request: ModifyRequest,
        turn: &ToolContext,
    ) -> Result<ModifyOutcome, EditEngineError> {
        let Some(document) = self.store.read_document(&request.document_id).await? else {
            return Ok(ModifyOutcome::NotFound {
                document_id: request.document_id,
            });
        };

        // Base resolution, first hit wins: caller snapshot, then cache, then
        // the row we just read. Within one turn the earlier tiers carry
        // writes the database may not have committed yet.
        let (base_content, base_history) = match request.base {
            Some(snapshot) => (snapshot.content, snapshot.version_history),
            None => match self.cache.get(&request.document_id) {
                Some(snapshot) => (snapshot.content, snapshot.version_history),
                None => (document.content.clone(), document.version_history.clone()),
            },
        };

        let content = match apply_edits(&base_content, &request.edits) {
            ApplyResult::Applied(content) => content,
            ApplyResult::Rejected {
                partial_content,
                failure,
            } => {
                let message = failure.to_string();
                // The fragment may quote customer document text; log its
                // shape only.
                let detail = format!(
                    "edit={} fragment={}",
                    failure.index,
                    redact_text(&failure.fragment)
                );
                emit_event(
                    Level::WARN,
                    ObservabilityEvent {
                        event: "edit_batch_rejected",
                        component: "edit_engine",
                        tool_name: None,
                        call_id: None,
                        message_id: turn.message_id.as_deref(),
                        document_id: Some(&request.document_id),
                        organization_id: Some(&turn.organization_id),
                        status: Some("rejected"),
                        error_code: None,
                        detail: Some(&detail),
                    },
                );
                return Ok(ModifyOutcome::EditRejected {
                    content: partial_content,
                    failure,
                    message,
                });
            }
        };

        self.commit_edited(request.document_id, document, request.name, content, base_history, turn)
            .await
    }

    /// Replace a document's content wholesale. Same version decision and
    /// commit path as an edit batch, used by the batched modify tools whose
    /// input carries the full new content per file.
    pub async fn replace_content(
        &self,
        document_id: &str,
        name: Option<String>,
        content: &str,
        turn: &ToolContext,
    ) -> Result<ModifyOutcome, EditEngineError> {
        let Some(document) = self.store.read_document(document_id).await? else {
            return Ok(ModifyOutcome::NotFound {
                document_id: document_id.to_string(),
            });
        };
        let base_history = match self.cache.get(document_id) {
            Some(snapshot) => snapshot.version_history,
            None => document.version_history.clone(),
        };
        self.commit_edited(
            document_id.to_string(),
            document,
            name,
            content.to_string(),
            base_history,
            turn,
        )
        .await
    }

    async fn commit_edited(
        &self,
        document_id: String,
        document: AssetDocument,
        name: Option<String>,
        content: String,
        mut history: VersionHistory,
        turn: &ToolContext,
    ) -> Result<ModifyOutcome, EditEngineError> {
        let now = Utc::now();
        // A document created by this same turn is still a draft the user is
        // iterating on; fold instead of minting a new version.
        let version_number = if document.created_at >= turn.turn_started_at {
            history.fold_into_latest(&content, now)
        } else {
            history.push_version(&content, now)
        };

        self.sequencer.wait_for_pending(&document_id).await;
        self.store
            .write_document(
                &document_id,
                DocumentWrite {
                    content: content.clone(),
                    name: name.clone(),
                    version_history: history.clone(),
                    updated_at: now,
                },
            )
            .await?;
        self.cache.put(&document_id, content.clone(), history);

        self.finish_commit(&document_id, document.kind, &content, version_number, turn)
            .await?;

        Ok(ModifyOutcome::Committed(CommittedDocument {
            id: document_id,
            name: name.unwrap_or(document.name),
            content,
            version_number,
            updated_at: now,
        }))
    }

    /// Authoritative commit for a document created earlier in this turn: the
    /// validated input content replaces whatever streamed in, as version 1.
    pub async fn commit_initial(
        &self,
        document_id: &str,
        name: &str,
        content: &str,
        kind: AssetKind,
        turn: &ToolContext,
    ) -> Result<CommittedDocument, EditEngineError> {
        let now = Utc::now();
        let history = VersionHistory::initial(content, now);

        self.sequencer.wait_for_pending(document_id).await;
        if self.store.read_document(document_id).await?.is_some() {
            self.store
                .write_document(
                    document_id,
                    DocumentWrite {
                        content: content.to_string(),
                        name: Some(name.to_string()),
                        version_history: history.clone(),
                        updated_at: now,
                    },
                )
                .await?;
        } else {
            // The streaming phase never materialized the draft row.
            self.store
                .create_document(AssetDocument {
                    id: document_id.to_string(),
                    name: name.to_string(),
                    kind,
                    content: content.to_string(),
                    version_history: history.clone(),
                    created_at: now,
                    updated_at: now,
                })
                .await?;
        }
        self.cache
            .put(document_id, content.to_string(), history);

        self.finish_commit(document_id, kind, content, 1, turn).await?;

        Ok(CommittedDocument {
            id: document_id.to_string(),
            name: name.to_string(),
            content: content.to_string(),
            version_number: 1,
            updated_at: now,
        })
    }

    async fn finish_commit(
        &self,
        document_id: &str,
        kind: AssetKind,
        content: &str,
        version_number: u32,
        turn: &ToolContext,
    ) -> Result<(), EditEngineError> {
        if kind == AssetKind::Report {
            let metric_ids = extract_metric_ids(content);
            if !metric_ids.is_empty() {
                self.store
                    .upsert_metric_links(document_id, &metric_ids)
                    .await?;
            }
        }
        if let Some(message_id) = &turn.message_id {
            self.store
                .track_file_associations(
                    message_id,
                    &[FileAssociation {
                        file_id: document_id.to_string(),
                        version_number,
                    }],
                )
                .await?;
        }
        let detail = format!("kind={} version={version_number}", kind.as_str());
        emit_event(
            Level::INFO,
            ObservabilityEvent {
                event: "document_commit",
                component: "edit_engine",
                tool_name: None,
                call_id: None,
                message_id: turn.message_id.as_deref(),
                document_id: Some(document_id),
                organization_id: Some(&turn.organization_id),
                status: Some("committed"),
                error_code: None,
                detail: Some(&detail),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_store::{SnapshotCache, SnapshotCacheConfig, Storage};
    use quarry_types::EditOp;
    use tempfile::TempDir;

    async fn engine() -> (TempDir, Arc<Storage>, Arc<SnapshotCache>, EditEngine) {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(tmp.path()).await.unwrap());
        let cache = Arc::new(SnapshotCache::new(SnapshotCacheConfig::default()));
        let engine = EditEngine::new(
            storage.clone(),
            cache.clone(),
            Arc::new(WriteSequencer::new()),
        );
        (tmp, storage, cache, engine)
    }

    fn replace(target: &str, code: &str) -> EditOperation {
        EditOperation {
            operation: EditOp::Replace,
            code_to_replace: target.to_string(),
            code: code.to_string(),
        }
    }

    #[tokio::test]
    async fn missing_document_is_a_structured_outcome() {
        let (_tmp, _storage, _cache, engine) = engine().await;
        let turn = ToolContext::new("user-1", "org-1");
        let outcome = engine
            .modify(
                ModifyRequest {
                    document_id: "ghost".to_string(),
                    name: None,
                    edits: vec![replace("a", "b")],
                    base: None,
                },
                &turn,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ModifyOutcome::NotFound { .. }));
    }

    #[tokio::test]
    async fn rejected_batch_is_not_persisted() {
        let (_tmp, storage, cache, engine) = engine().await;
        let turn = ToolContext::new("user-1", "org-1");
        engine
            .commit_initial("doc-1", "Doc", "ABC", AssetKind::Report, &turn)
            .await
            .unwrap();

        let outcome = engine
            .modify(
                ModifyRequest {
                    document_id: "doc-1".to_string(),
                    name: None,
                    edits: vec![replace("A", "X"), replace("Q", "Y")],
                    base: None,
                },
                &turn,
            )
            .await
            .unwrap();

        match outcome {
            ModifyOutcome::EditRejected {
                content, message, ..
            } => {
                assert_eq!(content, "XBC");
                assert!(message.starts_with("Edit 2:"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        // Neither store nor cache observed the partial content.
        let stored = storage.read_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.content, "ABC");
        assert_eq!(cache.get("doc-1").unwrap().content, "ABC");
    }

    #[tokio::test]
    async fn caller_snapshot_overrides_cache_and_store() {
        let (_tmp, _storage, cache, engine) = engine().await;
        let turn = ToolContext::new("user-1", "org-1");
        engine
            .commit_initial("doc-1", "Doc", "stored content", AssetKind::Report, &turn)
            .await
            .unwrap();
        cache.put(
            "doc-1",
            "cached content".to_string(),
            VersionHistory::initial("cached content", Utc::now()),
        );

        let snapshot = DocumentSnapshot {
            document_id: "doc-1".to_string(),
            content: "snapshot content".to_string(),
            version_history: VersionHistory::initial("snapshot content", Utc::now()),
            captured_at: Utc::now(),
        };
        let outcome = engine
            .modify(
                ModifyRequest {
                    document_id: "doc-1".to_string(),
                    name: None,
                    edits: vec![replace("snapshot", "edited")],
                    base: Some(snapshot),
                },
                &turn,
            )
            .await
            .unwrap();
        match outcome {
            ModifyOutcome::Committed(committed) => {
                assert_eq!(committed.content, "edited content");
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }
}
