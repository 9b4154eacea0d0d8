use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::domain::Job;

#[derive(Clone, Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is full")]
    Full,
    #[error("job queue is closed")]
    Closed,
}

/// Hand-off between the dispatcher and the worker pool. Semantics are
/// at-least-once from the worker's point of view: an implementation may
/// redeliver a job whose worker died before publishing its outcome.
#[async_trait::async_trait]
pub trait JobQueue: std::fmt::Debug + Send + Sync {
    /// Enqueue failure is always explicit; jobs are never silently dropped.
    async fn push(&self, job: Job) -> Result<(), QueueError>;
    /// Claims the next job, transferring ownership to the caller. Returns
    /// `None` once the queue is closed and drained.
    async fn pull(&self) -> Option<Job>;
    fn close(&self);
}

/// Bounded in-process queue. Does not survive a crash and does not
/// redeliver; a durable queue slots in behind the same trait.
#[derive(Debug)]
pub struct InMemoryQueue {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
}

impl InMemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryQueue {
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        let tx = {
            let guard = self.tx.lock().expect("queue sender lock");
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(QueueError::Closed);
        };
        tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    async fn pull(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }

    fn close(&self) {
        self.tx.lock().expect("queue sender lock").take();
    }
}
