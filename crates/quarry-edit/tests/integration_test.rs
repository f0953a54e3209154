use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use quarry_edit::{EditEngine, ModifyOutcome, ModifyRequest};
use quarry_store::{
    DocumentStore, SnapshotCache, SnapshotCacheConfig, SnapshotStore, Storage, WriteSequencer,
};
use quarry_types::{AssetKind, EditOp, EditOperation, ToolContext};

async fn setup() -> (TempDir, Arc<Storage>, Arc<SnapshotCache>, EditEngine) {
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

fn append(code: &str) -> EditOperation {
    EditOperation {
        operation: EditOp::Append,
        code_to_replace: String::new(),
        code: code.to_string(),
    }
}

#[tokio::test]
async fn edits_in_the_creating_turn_fold_into_version_one() {
    let (_tmp, storage, _cache, engine) = setup().await;
    let turn = ToolContext::new("user-1", "org-1");

    engine
        .commit_initial("report-1", "Q3 Report", "# Draft", AssetKind::Report, &turn)
        .await
        .unwrap();

    // Same turn context, so the commit folds rather than minting version 2.
    let outcome = engine
        .modify(
            ModifyRequest {
                document_id: "report-1".to_string(),
                name: None,
                edits: vec![replace("Draft", "Q3 Revenue")],
                base: None,
            },
            &turn,
        )
        .await
        .unwrap();

    match outcome {
        ModifyOutcome::Committed(committed) => {
            assert_eq!(committed.version_number, 1);
            assert_eq!(committed.content, "# Q3 Revenue");
        }
        other => panic!("expected commit, got {other:?}"),
    }

    let stored = storage.read_document("report-1").await.unwrap().unwrap();
    assert_eq!(stored.version_history.len(), 1);
    assert_eq!(
        stored.version_history.latest().unwrap().content,
        "# Q3 Revenue"
    );
}

#[tokio::test]
async fn edits_in_a_later_turn_mint_a_new_version() {
    let (_tmp, storage, _cache, engine) = setup().await;
    let first_turn = ToolContext::new("user-1", "org-1");

    engine
        .commit_initial("report-1", "Q3 Report", "# Draft", AssetKind::Report, &first_turn)
        .await
        .unwrap();

    let mut later_turn = ToolContext::new("user-1", "org-1");
    later_turn.turn_started_at = Utc::now() + Duration::seconds(5);

    let outcome = engine
        .modify(
            ModifyRequest {
                document_id: "report-1".to_string(),
                name: None,
                edits: vec![append("\nMore analysis.")],
                base: None,
            },
            &later_turn,
        )
        .await
        .unwrap();

    match outcome {
        ModifyOutcome::Committed(committed) => assert_eq!(committed.version_number, 2),
        other => panic!("expected commit, got {other:?}"),
    }

    let stored = storage.read_document("report-1").await.unwrap().unwrap();
    assert_eq!(stored.version_history.len(), 2);
    assert_eq!(stored.version_history.get(1).unwrap().content, "# Draft");
}

#[tokio::test]
async fn committed_content_is_written_through_to_the_cache() {
    let (_tmp, _storage, cache, engine) = setup().await;
    let turn = ToolContext::new("user-1", "org-1");

    engine
        .commit_initial("metric-1", "Revenue", "select 1", AssetKind::Metric, &turn)
        .await
        .unwrap();
    engine
        .modify(
            ModifyRequest {
                document_id: "metric-1".to_string(),
                name: None,
                edits: vec![replace("1", "2")],
                base: None,
            },
            &turn,
        )
        .await
        .unwrap();

    let snapshot = cache.get("metric-1").unwrap();
    assert_eq!(snapshot.content, "select 2");
    assert_eq!(snapshot.version_history.latest_version_number(), 1);
}

#[tokio::test]
async fn report_commits_upsert_metric_links() {
    let (_tmp, storage, _cache, engine) = setup().await;
    let turn = ToolContext::new("user-1", "org-1");

    let content = "# Sales\n<metric metricId=\"24db2cc8-79b0-488f-bd45-8b5412d1bf08\" />";
    engine
        .commit_initial("report-1", "Sales", content, AssetKind::Report, &turn)
        .await
        .unwrap();

    assert_eq!(
        storage.metric_links_for("report-1").await,
        vec!["24db2cc8-79b0-488f-bd45-8b5412d1bf08".to_string()]
    );
}

#[tokio::test]
async fn commits_track_file_associations_when_a_message_is_present() {
    let (_tmp, storage, _cache, engine) = setup().await;
    let turn = ToolContext::new("user-1", "org-1").with_message_id("msg-7");

    engine
        .commit_initial("dash-1", "Overview", "{}", AssetKind::Dashboard, &turn)
        .await
        .unwrap();

    let mut later_turn = ToolContext::new("user-1", "org-1").with_message_id("msg-8");
    later_turn.turn_started_at = Utc::now() + Duration::seconds(5);
    engine
        .modify(
            ModifyRequest {
                document_id: "dash-1".to_string(),
                name: Some("Company Overview".to_string()),
                edits: vec![append("\n")],
                base: None,
            },
            &later_turn,
        )
        .await
        .unwrap();

    let created = storage.associations_for("msg-7").await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].version_number, 1);

    let modified = storage.associations_for("msg-8").await;
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0].version_number, 2);

    let stored = storage.read_document("dash-1").await.unwrap().unwrap();
    assert_eq!(stored.name, "Company Overview");
}
