use crate::ingest::ChunkWorker;
use crate::models::IngestionUnit;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Fire-and-forget submission of ingestion units. The submitter never sees
/// the outcome of a unit.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, unit: IngestionUnit);
}

/// Runs every submitted unit as its own tokio task.
///
/// There is no concurrency cap and no deduplication: submitting the same
/// unit twice stores two chunks. `submit` must be called from inside a tokio
/// runtime.
#[derive(Clone)]
pub struct TokioTaskQueue {
    tracker: TaskTracker,
    worker: Arc<ChunkWorker>,
}

impl TokioTaskQueue {
    pub fn new(worker: Arc<ChunkWorker>) -> Self {
        Self {
            tracker: TaskTracker::new(),
            worker,
        }
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every unit submitted so far has finished. Later submissions still run.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl TaskQueue for TokioTaskQueue {
    fn submit(&self, unit: IngestionUnit) {
        debug!(
            document_id = %unit.document_id,
            chunk_index = unit.chunk_index,
            "queued ingestion unit"
        );
        let worker = Arc::clone(&self.worker);
        self.tracker.spawn(async move {
            worker.process(unit).await;
        });
    }
}
