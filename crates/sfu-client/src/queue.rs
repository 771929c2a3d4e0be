//! Serialized operation queue
//!
//! Each transport owns one [`OperationQueue`]: an unbounded channel drained by
//! a single worker task. Operations run strictly one at a time, in the order
//! they were pushed, and each caller gets its own result back through a
//! oneshot channel, so a failing operation never affects the ones queued
//! after it.
//!
//! Pushing is synchronous. A caller that pushes inside a plain (non-async)
//! function has its operation ordered at the moment of the call, not at the
//! moment the returned future is first polled.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};

struct QueuedOperation {
    label: &'static str,
    job: BoxFuture<'static, ()>,
}

/// FIFO queue running at most one operation at a time
pub struct OperationQueue {
    name: String,
    tx: mpsc::UnboundedSender<QueuedOperation>,
    pending: Arc<AtomicUsize>,
    pushed: AtomicU64,
}

impl OperationQueue {
    /// Create the queue and spawn its worker on the current tokio runtime
    ///
    /// The worker exits once the queue is dropped and every queued operation
    /// has run.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|_| Error::invalid_state("an operation queue requires a tokio runtime"))?;

        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedOperation>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        let worker_name = name.clone();
        handle.spawn(async move {
            while let Some(operation) = rx.recv().await {
                debug!(queue = %worker_name, operation = operation.label, "running queued operation");
                operation.job.await;
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
            debug!(queue = %worker_name, "operation queue worker stopped");
        });

        Ok(Self {
            name,
            tx,
            pending,
            pushed: AtomicU64::new(0),
        })
    }

    /// Enqueue an operation and return a future resolving to its result
    pub fn push<T, F>(&self, label: &'static str, operation: F) -> BoxFuture<'static, Result<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job = async move {
            // the caller may have stopped waiting
            let _ = result_tx.send(operation.await);
        };

        if let Err(err) = self.enqueue(label, job.boxed()) {
            return future::ready(Err(err)).boxed();
        }

        async move {
            match result_rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::internal(format!("queued operation '{}' was dropped", label))),
            }
        }
        .boxed()
    }

    /// Enqueue an operation nobody waits for; a failure is only logged
    pub fn push_detached<F>(&self, label: &'static str, operation: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = self.name.clone();
        let job = async move {
            if let Err(err) = operation.await {
                warn!(queue = %name, operation = label, error = %err, "detached operation failed");
            }
        };

        if let Err(err) = self.enqueue(label, job.boxed()) {
            warn!(queue = %self.name, operation = label, error = %err, "could not enqueue operation");
        }
    }

    /// Operations queued or running
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of operations accepted so far; doubles as the sequence number
    /// of the most recent push
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::SeqCst)
    }

    fn enqueue(&self, label: &'static str, job: BoxFuture<'static, ()>) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(QueuedOperation { label, job }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::internal(format!("operation queue '{}' stopped", self.name)));
        }
        self.pushed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("name", &self.name)
            .field("pending", &self.len())
            .finish()
    }
}
