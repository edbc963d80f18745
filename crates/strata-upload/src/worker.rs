use std::sync::Arc;

use strata_common::error::StoreError;
use strata_storage::traits::ObjectStore;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunker::PartTask;

#[derive(Debug)]
pub enum PartError {
    Store(StoreError),
    Cancelled,
}

/// Outcome of exactly one [`PartTask`].
#[derive(Debug)]
pub struct PartResult {
    pub part_number: u32,
    pub outcome: Result<String, PartError>,
}

/// Identity of the remote session every worker uploads into.
#[derive(Clone)]
pub struct PartTarget {
    pub store: Arc<dyn ObjectStore>,
    pub key: Arc<str>,
    pub upload_id: Arc<str>,
}

#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers sharing one task queue. Each worker owns a clone
    /// of `results`; the result channel closes once the last worker exits.
    pub fn spawn(
        count: usize,
        target: PartTarget,
        tasks: mpsc::Receiver<PartTask>,
        results: mpsc::Sender<PartResult>,
        cancel: CancellationToken,
    ) -> Self {
        let tasks = Arc::new(Mutex::new(tasks));
        let handles = (0..count.max(1))
            .map(|worker_id| {
                let target = target.clone();
                let tasks = Arc::clone(&tasks);
                let results = results.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, target, tasks, results, cancel).await;
                })
            })
            .collect();

        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "upload worker terminated abnormally");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    target: PartTarget,
    tasks: Arc<Mutex<mpsc::Receiver<PartTask>>>,
    results: mpsc::Sender<PartResult>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut receiver = tasks.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            break;
        };

        let part_number = task.part_number;
        let outcome = upload_one(&target, task, &cancel).await;
        if let Err(PartError::Store(err)) = &outcome {
            debug!(worker_id, part_number, code = err.error_code(), error = %err, "part upload failed");
        }

        if results.send(PartResult { part_number, outcome }).await.is_err() {
            break;
        }
    }
    debug!(worker_id, "upload worker finished");
}

/// Uploads one part. No retry happens here; a cancelled pipeline turns the
/// task into a `Cancelled` result without touching the store.
async fn upload_one(
    target: &PartTarget,
    task: PartTask,
    cancel: &CancellationToken,
) -> Result<String, PartError> {
    if cancel.is_cancelled() {
        return Err(PartError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PartError::Cancelled),
        uploaded = target.store.upload_part(
            &target.key,
            &target.upload_id,
            task.part_number,
            task.payload,
        ) => uploaded.map_err(PartError::Store),
    }
}
