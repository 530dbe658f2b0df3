use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, warn};

use crate::config::DEFAULT_QUEUE_CONCURRENCY;
use crate::error::{Result, StoreError};
use crate::state::lock;

/// Called for faults that are not ordinary task errors (panics, dropped tasks).
pub type FaultHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

type Job = BoxFuture<'static, ()>;

/// Counters describing queue activity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub faults: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

struct QueueInner {
    name: String,
    concurrency: usize,
    permits: Arc<Semaphore>,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    stats: Mutex<QueueStats>,
    on_fault: Option<FaultHandler>,
}

/// Runs submitted tasks with at most `concurrency` of them in flight.
///
/// Tasks start in submission order; completion order is whatever the
/// backend produces. A task's error is logged here and also returned to the
/// submitter.
///
/// ## Example
///
/// ```
/// use grpc_store::{StoreError, WriteQueue};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let queue = WriteQueue::new(3);
/// let answer = queue.submit(async { Ok::<_, StoreError>(42) }).await;
/// assert_eq!(answer, Ok(42));
/// # });
/// ```
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<QueueInner>,
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CONCURRENCY)
    }
}

impl WriteQueue {
    /// Create a queue admitting `concurrency` tasks at once (at least one).
    pub fn new(concurrency: usize) -> Self {
        Self::build("write-queue".to_string(), concurrency, None)
    }

    /// Name the queue for log fields.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let on_fault = self.inner.on_fault.clone();
        Self::build(name.into(), self.inner.concurrency, on_fault)
    }

    /// Install a handler for unexpected queue faults.
    pub fn with_fault_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        Self::build(
            self.inner.name.clone(),
            self.inner.concurrency,
            Some(Arc::new(handler)),
        )
    }

    fn build(name: String, concurrency: usize, on_fault: Option<FaultHandler>) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner: Arc::new(QueueInner {
                name,
                concurrency,
                permits: Arc::new(Semaphore::new(concurrency)),
                jobs: Mutex::new(None),
                stats: Mutex::new(QueueStats::default()),
                on_fault,
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn stats(&self) -> QueueStats {
        lock(&self.inner.stats).clone()
    }

    /// Queue `task` and return a future resolving to its result.
    ///
    /// The task runs whether or not the returned future is awaited. Must be
    /// called from within a tokio runtime.
    pub fn submit<F, T>(&self, task: F) -> BoxFuture<'static, Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);

        let job: Job = async move {
            inner.started();
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let result = match outcome {
                Ok(Ok(value)) => {
                    inner.finished(true);
                    Ok(value)
                }
                Ok(Err(err)) => {
                    warn!(queue = %inner.name, error = %err, "queued task failed");
                    inner.finished(false);
                    Err(err)
                }
                Err(panic) => {
                    let fault = StoreError::QueueFault(panic_message(panic.as_ref()));
                    inner.finished(false);
                    inner.fault(&fault);
                    Err(fault)
                }
            };
            // The submitter may have stopped waiting; the outcome is already
            // reflected in the stats and logs.
            let _ = tx.send(result);
        }
        .boxed();

        lock(&self.inner.stats).submitted += 1;

        if self.sender().send(job).is_err() {
            let fault = StoreError::QueueFault("queue dispatcher stopped".to_string());
            self.inner.fault(&fault);
            return future::ready(Err(fault)).boxed();
        }

        let inner = Arc::clone(&self.inner);
        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => {
                    let fault =
                        StoreError::QueueFault("task dropped before completion".to_string());
                    inner.fault(&fault);
                    Err(fault)
                }
            }
        }
        .boxed()
    }

    /// The job channel, starting the dispatcher on first use.
    fn sender(&self) -> mpsc::UnboundedSender<Job> {
        let mut jobs = lock(&self.inner.jobs);
        if let Some(tx) = jobs.as_ref().filter(|tx| !tx.is_closed()) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(
            self.inner.name.clone(),
            rx,
            Arc::clone(&self.inner.permits),
        ));
        *jobs = Some(tx.clone());
        tx
    }
}

/// Start jobs in arrival order, each once a permit is free.
async fn dispatch(name: String, mut rx: mpsc::UnboundedReceiver<Job>, permits: Arc<Semaphore>) {
    while let Some(job) = rx.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        tokio::spawn(async move {
            job.await;
            drop(permit);
        });
    }
    debug!(queue = %name, "write queue dispatcher stopped");
}

impl QueueInner {
    fn started(&self) {
        let mut stats = lock(&self.stats);
        stats.in_flight += 1;
        stats.peak_in_flight = stats.peak_in_flight.max(stats.in_flight);
    }

    fn finished(&self, ok: bool) {
        let mut stats = lock(&self.stats);
        stats.in_flight = stats.in_flight.saturating_sub(1);
        if ok {
            stats.completed += 1;
        } else {
            stats.failed += 1;
        }
    }

    fn fault(&self, fault: &StoreError) {
        error!(queue = %self.name, error = %fault, "write queue fault");
        {
            let mut stats = lock(&self.stats);
            stats.faults += 1;
        }
        if let Some(handler) = &self.on_fault {
            handler(fault);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}
