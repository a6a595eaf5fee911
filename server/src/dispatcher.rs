//! Bounded job queue feeding a fixed pool of workers.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::interaction::GenerationRequest;
use crate::job::JobRunner;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("job queue is full")]
    QueueFull(GenerationRequest),

    #[error("job queue is closed")]
    Closed(GenerationRequest),
}

/// Handle used by request handlers to enqueue jobs. Cheap to clone.
#[derive(Clone, Debug)]
pub struct JobDispatcher {
    sender: Arc<RwLock<Option<mpsc::Sender<GenerationRequest>>>>,
}

impl JobDispatcher {
    /// Enqueue without waiting. A full queue is reported, not awaited.
    pub fn submit(&self, request: GenerationRequest) -> Result<(), SubmitError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(SubmitError::Closed(request));
        };
        sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(r) => SubmitError::QueueFull(r),
            mpsc::error::TrySendError::Closed(r) => SubmitError::Closed(r),
        })
    }

    /// Stop accepting jobs. Already queued jobs are still run.
    pub fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// The worker tasks. Join after closing the dispatcher to drain the queue.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {e}");
            }
        }
        info!("All workers stopped");
    }
}

/// Spawn `workers` tasks consuming a queue of `capacity` pending jobs.
pub fn start(runner: JobRunner, workers: usize, capacity: usize) -> (JobDispatcher, WorkerPool) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));
    let runner = Arc::new(runner);

    let workers = (0..workers.max(1))
        .map(|id| tokio::spawn(worker_loop(id, rx.clone(), runner.clone())))
        .collect();

    let dispatcher = JobDispatcher {
        sender: Arc::new(RwLock::new(Some(tx))),
    };
    (dispatcher, WorkerPool { workers })
}

async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<GenerationRequest>>>,
    runner: Arc<JobRunner>,
) {
    debug!(worker = id, "Worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(request) = next else {
            break;
        };
        let job_id = request.id;

        // a panicking job must not take the worker down with it
        let runner = runner.clone();
        let handle = tokio::spawn(async move { runner.run(request).await });
        if let Err(e) = handle.await {
            error!(worker = id, job = %job_id, "Job aborted: {e}");
        }
    }
    debug!(worker = id, "Worker exiting, queue closed");
}
