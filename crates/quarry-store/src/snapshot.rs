//! Short-lived snapshot cache for in-turn sequential edits.
//!
//! When two tool calls in one turn mutate the same document (create-report
//! then modify-report), a fresh database read would race the uncommitted
//! prior write. The cache holds the last written content per document so the
//! second call sees the first call's effect without locking. This is a
//! process-local optimization, not a consistency mechanism: multi-instance
//! deployments need sticky routing per document or a shared `SnapshotStore`
//! implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use quarry_types::{DocumentSnapshot, VersionHistory};
use tokio::task::JoinHandle;

/// Seam for snapshot storage. The default is the in-process TTL map below.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, document_id: &str) -> Option<DocumentSnapshot>;
    fn put(&self, document_id: &str, content: String, version_history: VersionHistory);
    fn remove(&self, document_id: &str);
}

#[derive(Debug, Clone)]
pub struct SnapshotCacheConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for SnapshotCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// In-memory TTL map. At most one live snapshot per document id; entries
/// older than the TTL behave as absent. Reads and writes are synchronous
/// and O(1). Explicitly constructed and torn down — no global state.
pub struct SnapshotCache {
    entries: Mutex<HashMap<String, DocumentSnapshot>>,
    ttl: Duration,
    sweep_interval: Duration,
}

impl SnapshotCache {
    pub fn new(config: SnapshotCacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: config.ttl,
            sweep_interval: config.sweep_interval,
        }
    }

    fn is_expired(&self, snapshot: &DocumentSnapshot) -> bool {
        let age = Utc::now().signed_duration_since(snapshot.captured_at);
        age.num_milliseconds() >= self.ttl.as_millis() as i64
    }

    /// Remove every expired entry so the map cannot grow unbounded across a
    /// long-lived process.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().expect("snapshot cache poisoned");
        let before = entries.len();
        entries.retain(|_, snapshot| {
            Utc::now().signed_duration_since(snapshot.captured_at).num_milliseconds()
                < self.ttl.as_millis() as i64
        });
        before - entries.len()
    }

    /// Spawn the periodic sweeper at the configured interval. Abort the
    /// returned handle to tear the cache down cleanly (tests, multi-tenant
    /// process reuse).
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "snapshot cache sweep");
                }
            }
        })
    }
}

impl SnapshotStore for SnapshotCache {
    fn get(&self, document_id: &str) -> Option<DocumentSnapshot> {
        let mut entries = self.entries.lock().expect("snapshot cache poisoned");
        match entries.get(document_id) {
            Some(snapshot) if !self.is_expired(snapshot) => Some(snapshot.clone()),
            Some(_) => {
                entries.remove(document_id);
                None
            }
            None => None,
        }
    }

    fn put(&self, document_id: &str, content: String, version_history: VersionHistory) {
        let snapshot = DocumentSnapshot {
            document_id: document_id.to_string(),
            content,
            version_history,
            captured_at: Utc::now(),
        };
        self.entries
            .lock()
            .expect("snapshot cache poisoned")
            .insert(document_id.to_string(), snapshot);
    }

    fn remove(&self, document_id: &str) {
        self.entries
            .lock()
            .expect("snapshot cache poisoned")
            .remove(document_id);
    }
}
