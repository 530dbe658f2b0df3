use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use super::debounce::{settle, Debouncer, Flush};
use super::history::{HistoryEntry, OpHistory, OpId};
use crate::config::StoreConfig;
use crate::connection::{ClientFactory, ClientSlot};
use crate::error::{Result, StoreError};
use crate::queue::{QueueStats, WriteQueue};
use crate::state::{lock, Generation, Published};

pub type ReadFn<P, C, T> = Arc<dyn Fn(C, P) -> BoxFuture<'static, Result<T>> + Send + Sync>;
pub type WriteFn<P, C, T, R> = Arc<dyn Fn(C, P, T) -> BoxFuture<'static, Result<R>> + Send + Sync>;
pub type MergeFn<T, U> = Arc<dyn Fn(&T, &U) -> T + Send + Sync>;
pub type ProcessResponseFn<T, U, R> = Arc<dyn Fn(&T, R, &U) -> T + Send + Sync>;

/// How a write or update reaches the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Apply locally at once, send in the background, roll back on failure.
    #[default]
    Optimistic,
    /// Send first and only change local data once the backend accepts.
    WaitForResponse,
}

/// Observable state of an [`OptimisticStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticSnapshot<T> {
    /// Confirmed data with every pending optimistic operation applied.
    pub data: Option<T>,
    /// Data the backend has confirmed.
    pub confirmed: Option<T>,
    pub pending_ops: usize,
    pub is_loading: bool,
    pub is_writing: bool,
    pub writes_in_flight: usize,
    pub error: Option<String>,
    pub write_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for OptimisticSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            confirmed: None,
            pending_ops: 0,
            is_loading: false,
            is_writing: false,
            writes_in_flight: 0,
            error: None,
            write_error: None,
            last_updated: None,
        }
    }
}

/// Builds an [`OptimisticStore`].
///
/// `with_write` and `with_merge` change the builder's response and
/// partial-update types, so call `with_process_response` after them.
pub struct OptimisticStoreBuilder<P, C, T, U, R> {
    config: StoreConfig,
    create_client: ClientFactory<P, C>,
    read: ReadFn<P, C, T>,
    write: Option<WriteFn<P, C, T, R>>,
    merge: Option<MergeFn<T, U>>,
    process_response: Option<ProcessResponseFn<T, U, R>>,
    queue: Option<WriteQueue>,
}

impl<P, C, T, U, R> OptimisticStoreBuilder<P, C, T, U, R>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend call persisting a full value.
    pub fn with_write<R2, W, Fut>(self, write: W) -> OptimisticStoreBuilder<P, C, T, U, R2>
    where
        W: Fn(C, P, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R2>> + Send + 'static,
    {
        OptimisticStoreBuilder {
            config: self.config,
            create_client: self.create_client,
            read: self.read,
            write: Some(Arc::new(move |client, params, data| {
                write(client, params, data).boxed()
            })),
            merge: self.merge,
            process_response: None,
            queue: self.queue,
        }
    }

    /// Combine the current data with a partial update. Enables `update`.
    pub fn with_merge<U2, M>(self, merge: M) -> OptimisticStoreBuilder<P, C, T, U2, R>
    where
        M: Fn(&T, &U2) -> T + Send + Sync + 'static,
    {
        OptimisticStoreBuilder {
            config: self.config,
            create_client: self.create_client,
            read: self.read,
            write: self.write,
            merge: Some(Arc::new(merge)),
            process_response: None,
            queue: self.queue,
        }
    }

    /// Derive the confirmed value from the backend's response to an update
    /// sent with [`WriteMode::WaitForResponse`].
    pub fn with_process_response<F>(mut self, process: F) -> Self
    where
        F: Fn(&T, R, &U) -> T + Send + Sync + 'static,
    {
        self.process_response = Some(Arc::new(process));
        self
    }

    /// Share a write queue with other stores instead of creating one.
    pub fn with_queue(mut self, queue: WriteQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> OptimisticStore<P, C, T, U, R> {
        let queue = self.queue.unwrap_or_else(|| {
            WriteQueue::new(self.config.queue_concurrency).with_name(self.config.name.clone())
        });
        let debouncer = self
            .config
            .debounce()
            .map(|window| Arc::new(Debouncer::new(window)));

        OptimisticStore {
            inner: Arc::new(Inner {
                name: self.config.name,
                create_client: self.create_client,
                read: self.read,
                write: self.write,
                merge: self.merge,
                process_response: self.process_response,
                queue,
                debouncer,
                slot: Mutex::new(ClientSlot::new()),
                history: Mutex::new(OpHistory::new()),
                state: Published::new(OptimisticSnapshot::default()),
                generation: Generation::default(),
            }),
        }
    }
}

struct Inner<P, C, T, U, R> {
    name: String,
    create_client: ClientFactory<P, C>,
    read: ReadFn<P, C, T>,
    write: Option<WriteFn<P, C, T, R>>,
    merge: Option<MergeFn<T, U>>,
    process_response: Option<ProcessResponseFn<T, U, R>>,
    queue: WriteQueue,
    debouncer: Option<Arc<Debouncer<T, T>>>,
    slot: Mutex<ClientSlot<P, C>>,
    history: Mutex<OpHistory<T, U>>,
    state: Published<OptimisticSnapshot<T>>,
    generation: Generation,
}

/// Read-through store with optimistic writes.
///
/// `write` replaces the whole value and `update` applies a partial change
/// through the merge function. In the default [`WriteMode::Optimistic`] the
/// change is visible through `data()` as soon as the call returns, before
/// the backend has answered. Every optimistic change is tracked under its
/// own [`OpId`]; if the backend rejects it, only that change is rolled back.
/// An accepted payload becomes the confirmed data as sent, together with
/// the earlier changes it carried.
///
/// Full writes are debounced (see [`StoreConfig::debounce_ms`]) so bursts of
/// edits produce one backend call. Partial updates are never debounced and
/// go through a [`WriteQueue`] instead.
pub struct OptimisticStore<P, C, T, U = T, R = ()> {
    inner: Arc<Inner<P, C, T, U, R>>,
}

impl<P, C, T, U, R> Clone for OptimisticStore<P, C, T, U, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C, T> OptimisticStore<P, C, T, T, ()>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn builder<F, G, Fut>(create_client: F, read: G) -> OptimisticStoreBuilder<P, C, T, T, ()>
    where
        F: Fn(&P) -> Result<C> + Send + Sync + 'static,
        G: Fn(C, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        OptimisticStoreBuilder {
            config: StoreConfig::named("optimistic"),
            create_client: Arc::new(create_client),
            read: Arc::new(move |client, params| read(client, params).boxed()),
            write: None,
            merge: None,
            process_response: None,
            queue: None,
        }
    }
}

impl<P, C, T, U, R> OptimisticStore<P, C, T, U, R>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Build a new client from `params` and load the data.
    pub async fn set_params(&self, params: P) -> Result<()> {
        let replaced = lock(&self.inner.slot).replace(params, &self.inner.create_client);
        self.inner.generation.next();
        if let Err(err) = &replaced {
            warn!(store = %self.inner.name, error = %err, "client construction failed");
            self.inner.state.modify(|s| {
                s.is_loading = false;
                s.error = Some(err.user_message());
            });
            return replaced;
        }
        self.load_data().await;
        replaced
    }

    /// Read the data from the backend.
    ///
    /// A failed read records the error and keeps whatever data was already
    /// loaded.
    pub async fn load_data(&self) {
        let checkout = lock(&self.inner.slot).checkout();
        let (client, params) = match checkout {
            Ok(pair) => pair,
            Err(err) => {
                debug!(store = %self.inner.name, error = %err, "load skipped");
                self.inner
                    .state
                    .modify(|s| s.error = Some(err.user_message()));
                return;
            }
        };

        let generation = self.inner.generation.next();
        self.inner.state.modify(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let result = (self.inner.read)(client, params).await;

        if !self.inner.generation.is_current(generation) {
            debug!(store = %self.inner.name, generation, "dropping stale read");
            return;
        }

        match result {
            Ok(data) => {
                self.inner
                    .with_history(|history, merge| history.set_base(Some(data), merge));
                self.inner.state.modify(|s| {
                    s.is_loading = false;
                    s.error = None;
                    s.last_updated = Some(Utc::now());
                });
            }
            Err(err) => {
                warn!(store = %self.inner.name, error = %err, "read failed");
                self.inner.state.modify(|s| {
                    s.is_loading = false;
                    s.error = Some(err.user_message());
                });
            }
        }
    }

    /// Replace the whole value.
    ///
    /// In optimistic mode the new value is visible before this returns; the
    /// returned future resolves once the (possibly coalesced) backend call
    /// settles, with the value that was actually sent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn write(&self, data: T, mode: WriteMode) -> BoxFuture<'static, Result<T>> {
        let Some(write) = self.inner.write.clone() else {
            return future::ready(Err(StoreError::WriteUnavailable)).boxed();
        };
        match mode {
            WriteMode::Optimistic => self.inner.write_optimistic(write, data),
            WriteMode::WaitForResponse => {
                let inner = Arc::clone(&self.inner);
                async move { inner.write_and_wait(write, data).await }.boxed()
            }
        }
    }

    /// Apply a partial update on top of the current (possibly optimistic)
    /// data.
    ///
    /// Requires both a write and a merge function; otherwise resolves to
    /// [`StoreError::UpdateUnavailable`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn update(&self, partial: U, mode: WriteMode) -> BoxFuture<'static, Result<T>> {
        let (Some(write), Some(merge)) = (self.inner.write.clone(), self.inner.merge.clone())
        else {
            return future::ready(Err(StoreError::UpdateUnavailable)).boxed();
        };
        match mode {
            WriteMode::Optimistic => self.inner.update_optimistic(write, partial),
            WriteMode::WaitForResponse => {
                let inner = Arc::clone(&self.inner);
                async move { inner.update_and_wait(write, merge, partial).await }.boxed()
            }
        }
    }

    /// Locally drop the most recent unconfirmed optimistic change.
    ///
    /// The backend call behind it is not cancelled. If the backend still
    /// accepts it, the value it sent becomes the confirmed data again.
    pub fn undo_last(&self) -> Option<OpId> {
        let undone = self
            .inner
            .with_history(|history, merge| history.undo_last(merge));
        if let Some(id) = undone {
            debug!(store = %self.inner.name, op_id = %id, "optimistic change undone");
        }
        undone
    }

    /// Pending optimistic data if there is any, otherwise confirmed data.
    pub fn data(&self) -> Option<T> {
        self.inner.state.read(|s| s.data.clone())
    }

    pub fn confirmed_data(&self) -> Option<T> {
        self.inner.state.read(|s| s.confirmed.clone())
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.inner.history).entries()
    }

    pub fn supports_write(&self) -> bool {
        self.inner.write.is_some()
    }

    pub fn supports_update(&self) -> bool {
        self.inner.write.is_some() && self.inner.merge.is_some()
    }

    pub fn client_ready(&self) -> bool {
        lock(&self.inner.slot).is_ready()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read(|s| s.is_loading)
    }

    pub fn is_writing(&self) -> bool {
        self.inner.state.read(|s| s.is_writing)
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.read(|s| s.error.clone())
    }

    pub fn write_error(&self) -> Option<String> {
        self.inner.state.read(|s| s.write_error.clone())
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn snapshot(&self) -> OptimisticSnapshot<T> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<OptimisticSnapshot<T>> {
        self.inner.state.subscribe()
    }
}

impl<P, C, T, U, R> Inner<P, C, T, U, R>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Mutate the history and publish the resulting data.
    fn with_history<X>(
        &self,
        f: impl FnOnce(&mut OpHistory<T, U>, &dyn Fn(&T, &U) -> T) -> X,
    ) -> X {
        // Only merge operations call this, and they are never pushed
        // without a merge function.
        let unmerged = |current: &T, _: &U| current.clone();
        let merge: &dyn Fn(&T, &U) -> T = match &self.merge {
            Some(merge) => merge.as_ref(),
            None => &unmerged,
        };

        let mut history = lock(&self.history);
        let out = f(&mut history, merge);
        let visible = history.visible().cloned();
        let confirmed = history.base().cloned();
        let pending = history.pending_len();
        self.state.modify(|s| {
            s.data = visible;
            s.confirmed = confirmed;
            s.pending_ops = pending;
        });
        out
    }

    fn begin_write(&self) {
        self.state.modify(|s| {
            s.writes_in_flight += 1;
            s.is_writing = true;
        });
    }

    fn end_writes(&self, count: usize, outcome: std::result::Result<(), &StoreError>) {
        self.state.modify(|s| {
            s.writes_in_flight = s.writes_in_flight.saturating_sub(count);
            s.is_writing = s.writes_in_flight > 0;
            s.write_error = outcome.err().map(StoreError::user_message);
        });
    }

    fn write_optimistic(
        self: &Arc<Self>,
        write: WriteFn<P, C, T, R>,
        data: T,
    ) -> BoxFuture<'static, Result<T>> {
        let id = self.with_history(|history, _| history.push_replace(data.clone()));
        self.begin_write();
        debug!(store = %self.name, op_id = %id, "optimistic write applied");

        let this = Arc::clone(self);
        let flush: Flush<T, T> =
            Box::new(move |value, ids| this.flush_replace(write, value, ids).boxed());

        match &self.debouncer {
            Some(debouncer) => settle(debouncer.push(id, data, flush)).boxed(),
            None => {
                let (tx, rx) = oneshot::channel();
                tokio::spawn(async move {
                    let _ = tx.send(flush(data, vec![id]).await);
                });
                settle(rx).boxed()
            }
        }
    }

    /// Send one coalesced value and settle every operation it covers.
    async fn flush_replace(
        self: Arc<Self>,
        write: WriteFn<P, C, T, R>,
        value: T,
        ids: Vec<OpId>,
    ) -> Result<T> {
        let checkout = lock(&self.slot).checkout();
        let result = match checkout {
            Ok((client, params)) => write(client, params, value.clone()).await.map(|_| value),
            Err(err) => Err(err),
        };

        match &result {
            Ok(value) => {
                debug!(store = %self.name, ops = ids.len(), "write confirmed");
                if let Some(last) = ids.iter().max() {
                    self.with_history(|history, merge| {
                        history.confirm(*last, value.clone(), merge)
                    });
                }
                self.end_writes(ids.len(), Ok(()));
            }
            Err(err) => {
                warn!(
                    store = %self.name,
                    ops = ids.len(),
                    error = %err,
                    "write failed, rolling back"
                );
                self.with_history(|history, merge| {
                    for id in &ids {
                        history.revert(*id, merge);
                    }
                });
                self.end_writes(ids.len(), Err(err));
            }
        }
        result
    }

    async fn write_and_wait(self: Arc<Self>, write: WriteFn<P, C, T, R>, data: T) -> Result<T> {
        let checkout = lock(&self.slot).checkout();
        let (client, params) = match checkout {
            Ok(pair) => pair,
            Err(err) => {
                self.state
                    .modify(|s| s.write_error = Some(err.user_message()));
                return Err(err);
            }
        };

        self.begin_write();
        match write(client, params, data.clone()).await {
            Ok(_) => {
                self.with_history(|history, merge| history.set_base(Some(data.clone()), merge));
                self.end_writes(1, Ok(()));
                self.state.modify(|s| s.last_updated = Some(Utc::now()));
                Ok(data)
            }
            Err(err) => {
                warn!(store = %self.name, error = %err, "write failed");
                self.end_writes(1, Err(&err));
                Err(err)
            }
        }
    }

    fn update_optimistic(
        self: &Arc<Self>,
        write: WriteFn<P, C, T, R>,
        partial: U,
    ) -> BoxFuture<'static, Result<T>> {
        let applied = self.with_history(|history, merge| {
            history.visible()?;
            let id = history.push_merge(partial, merge);
            history.visible().cloned().map(|merged| (id, merged))
        });
        let Some((id, merged)) = applied else {
            return future::ready(Err(StoreError::NoData)).boxed();
        };
        self.begin_write();
        debug!(store = %self.name, op_id = %id, "optimistic update applied");

        let this = Arc::clone(self);
        let payload = merged.clone();
        let queued = self.queue.submit(async move {
            let checkout = lock(&this.slot).checkout();
            let (client, params) = checkout?;
            write(client, params, payload).await
        });

        let this = Arc::clone(self);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = queued.await.map(|_| merged);
            this.settle_update(id, result.as_ref());
            let _ = tx.send(result);
        });
        settle(rx).boxed()
    }

    /// Adopt or roll back one queued update. An accepted payload becomes the
    /// confirmed data; optimistic changes made after it stay on top.
    fn settle_update(&self, id: OpId, outcome: std::result::Result<&T, &StoreError>) {
        match outcome {
            Ok(payload) => {
                debug!(store = %self.name, op_id = %id, "update confirmed");
                self.with_history(|history, merge| {
                    history.confirm(id, payload.clone(), merge)
                });
                self.end_writes(1, Ok(()));
            }
            Err(err) => {
                warn!(store = %self.name, op_id = %id, error = %err, "update failed, rolling back");
                self.with_history(|history, merge| history.revert(id, merge));
                self.end_writes(1, Err(err));
            }
        }
    }

    async fn update_and_wait(
        self: Arc<Self>,
        write: WriteFn<P, C, T, R>,
        merge: MergeFn<T, U>,
        partial: U,
    ) -> Result<T> {
        let current = lock(&self.history).visible().cloned();
        let Some(current) = current else {
            return Err(StoreError::NoData);
        };
        let merged = merge(&current, &partial);

        let checkout = lock(&self.slot).checkout();
        let (client, params) = match checkout {
            Ok(pair) => pair,
            Err(err) => {
                self.state
                    .modify(|s| s.write_error = Some(err.user_message()));
                return Err(err);
            }
        };

        self.begin_write();
        match write(client, params, merged.clone()).await {
            Ok(response) => {
                let confirmed = match &self.process_response {
                    Some(process) => process(&current, response, &partial),
                    None => merged,
                };
                self.with_history(|history, merge| {
                    history.set_base(Some(confirmed.clone()), merge)
                });
                self.end_writes(1, Ok(()));
                self.state.modify(|s| s.last_updated = Some(Utc::now()));
                Ok(confirmed)
            }
            Err(err) => {
                warn!(store = %self.name, error = %err, "update failed");
                self.end_writes(1, Err(&err));
                Err(err)
            }
        }
    }
}
