use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use super::history::OpId;
use crate::error::{Result, StoreError};
use crate::state::{lock, Generation};

/// Sends one coalesced value for every operation id collected in the window.
pub(crate) type Flush<V, R> = Box<dyn FnOnce(V, Vec<OpId>) -> BoxFuture<'static, Result<R>> + Send>;

struct Batch<V, R> {
    latest: Option<V>,
    flush: Option<Flush<V, R>>,
    waiters: Vec<(OpId, oneshot::Sender<Result<R>>)>,
}

impl<V, R> Default for Batch<V, R> {
    fn default() -> Self {
        Self {
            latest: None,
            flush: None,
            waiters: Vec::new(),
        }
    }
}

/// Coalesces values pushed within a quiet window into a single flush.
///
/// Every push restarts the window. When it elapses, the latest value is
/// flushed once and the outcome is delivered to each push's own receiver.
pub(crate) struct Debouncer<V, R> {
    window: Duration,
    batch: Mutex<Batch<V, R>>,
    epoch: Generation,
}

impl<V, R> Debouncer<V, R>
where
    V: Send + 'static,
    R: Clone + Send + 'static,
{
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            batch: Mutex::new(Batch::default()),
            epoch: Generation::default(),
        }
    }

    /// Queue `value` for the next flush. Must be called from within a tokio
    /// runtime.
    pub(crate) fn push(
        self: &Arc<Self>,
        op: OpId,
        value: V,
        flush: Flush<V, R>,
    ) -> oneshot::Receiver<Result<R>> {
        let (tx, rx) = oneshot::channel();
        let epoch = {
            let mut batch = lock(&self.batch);
            batch.latest = Some(value);
            batch.flush = Some(flush);
            batch.waiters.push((op, tx));
            self.epoch.next()
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            let batch = {
                let mut batch = lock(&this.batch);
                // A later push restarted the window.
                if !this.epoch.is_current(epoch) {
                    return;
                }
                std::mem::take(&mut *batch)
            };
            let (Some(value), Some(flush)) = (batch.latest, batch.flush) else {
                return;
            };

            let ids = batch.waiters.iter().map(|(id, _)| *id).collect();
            let result = flush(value, ids).await;
            for (_, waiter) in batch.waiters {
                let _ = waiter.send(result.clone());
            }
        });
        rx
    }

    /// Number of values waiting for the window to elapse.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        lock(&self.batch).waiters.len()
    }
}

/// Resolve a debounced receiver, treating a dropped batch as cancellation.
pub(crate) async fn settle<R>(rx: oneshot::Receiver<Result<R>>) -> Result<R> {
    rx.await
        .unwrap_or_else(|_| Err(StoreError::Cancelled("debounced write was dropped".to_string())))
}
