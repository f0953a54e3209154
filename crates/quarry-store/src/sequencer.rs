//! Per-document write ordering.
//!
//! Delta-time progress writes and the final authoritative commit for the same
//! document may complete out of order if left alone; last-write-wins would
//! then let a stale progress write land after the commit. Each tracked write
//! becomes the new tail of a per-document chain; the commit step awaits the
//! current tail before issuing its own write. Tail failures are logged and
//! never propagate — a failed progress write must not block the commit.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

type Tail = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
pub struct WriteSequencer {
    tails: Mutex<HashMap<String, Tail>>,
}

impl WriteSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `write` as the new tail for `document_id` and return a future
    /// the caller awaits to drive it. The write runs after the previous tail
    /// finishes; its error, if any, is logged and swallowed.
    pub fn track<F>(&self, document_id: &str, write: F) -> impl Future<Output = ()> + Send + 'static
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut tails = self.tails.lock().expect("write sequencer poisoned");
        let previous = tails.get(document_id).cloned();
        let id = document_id.to_string();
        let chained: Tail = async move {
            if let Some(previous) = previous {
                previous.await;
            }
            if let Err(err) = write.await {
                tracing::warn!(document_id = %id, error = %err, "sequenced write failed");
            }
        }
        .boxed()
        .shared();
        tails.insert(document_id.to_string(), chained.clone());
        chained
    }

    /// Await every write tracked for `document_id` so far. Used by the edit
    /// engine's commit step to order itself after in-flight progress writes.
    pub async fn wait_for_pending(&self, document_id: &str) {
        let tail = {
            let tails = self.tails.lock().expect("write sequencer poisoned");
            tails.get(document_id).cloned()
        };
        if let Some(tail) = tail {
            tail.await;
        }
    }

    /// Drop the chain for a document once its tool calls are done.
    pub fn clear(&self, document_id: &str) {
        self.tails
            .lock()
            .expect("write sequencer poisoned")
            .remove(document_id);
    }
}
