use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::lifecycle::{LifecycleEmitter, LifecycleKind};
#[cfg(feature = "emitter")]
use super::lifecycle::StreamLifecycle;
use crate::config::StoreConfig;
use crate::connection::Blank;
use crate::error::{Result, StoreError};
use crate::state::{lock, Generation, Published};

/// Opens a server-push stream for the given params.
pub type StreamFactory<P, T> =
    Arc<dyn Fn(&P) -> Result<BoxStream<'static, Result<T>>> + Send + Sync>;

/// Observable state of a [`StreamStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot<T> {
    pub data: Option<T>,
    pub is_streaming: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for StreamSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_streaming: false,
            is_loading: false,
            error: None,
            last_updated: None,
        }
    }
}

pub struct StreamStoreBuilder<P, T> {
    config: StoreConfig,
    create_stream: StreamFactory<P, T>,
}

impl<P, T> StreamStoreBuilder<P, T>
where
    P: Blank + PartialEq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> StreamStore<P, T> {
        StreamStore {
            inner: Arc::new(Inner {
                name: self.config.name,
                create_stream: self.create_stream,
                params: Mutex::new(None),
                consumer: Mutex::new(None),
                state: Published::new(StreamSnapshot::default()),
                epoch: Generation::default(),
                lifecycle: LifecycleEmitter::new(),
            }),
        }
    }
}

struct Inner<P, T> {
    name: String,
    create_stream: StreamFactory<P, T>,
    params: Mutex<Option<P>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    state: Published<StreamSnapshot<T>>,
    /// Bumped whenever a stream is opened or stopped; a consumer whose epoch
    /// is no longer current must not touch state.
    epoch: Generation,
    lifecycle: LifecycleEmitter,
}

/// Keeps the latest payload pushed by a long-lived stream.
///
/// A stream error or end stops streaming but keeps the last payload. There
/// is no automatic reconnect: call `set_params` (or `start_stream` once the
/// stream has stopped) to open a new one.
pub struct StreamStore<P, T> {
    inner: Arc<Inner<P, T>>,
}

impl<P, T> Clone for StreamStore<P, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, T> StreamStore<P, T>
where
    P: Blank + PartialEq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn builder<F, S>(create_stream: F) -> StreamStoreBuilder<P, T>
    where
        F: Fn(&P) -> Result<S> + Send + Sync + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        StreamStoreBuilder {
            config: StoreConfig::named("stream"),
            create_stream: Arc::new(move |params| {
                create_stream(params).map(|stream| stream.boxed())
            }),
        }
    }

    /// Open a stream for `params`, replacing any running one.
    ///
    /// Blank params are rejected. Equal params while already streaming are
    /// a no-op. Must be called from within a tokio runtime.
    pub fn set_params(&self, params: P) -> Result<()> {
        if params.is_blank() {
            warn!(store = %self.inner.name, "refusing to stream with blank params");
            self.inner
                .state
                .modify(|s| s.error = Some(StoreError::BlankParams.user_message()));
            return Err(StoreError::BlankParams);
        }

        let unchanged = self.is_streaming() && lock(&self.inner.params).as_ref() == Some(&params);
        if unchanged {
            debug!(store = %self.inner.name, "already streaming with these params");
            return Ok(());
        }

        self.cancel();
        *lock(&self.inner.params) = Some(params.clone());
        self.open(&params)
    }

    /// Open a stream with the stored params if none is running.
    pub fn start_stream(&self) -> Result<()> {
        if self.is_streaming() {
            return Ok(());
        }
        let params = lock(&self.inner.params).clone();
        match params {
            Some(params) => self.open(&params),
            None => {
                debug!(store = %self.inner.name, "start_stream without params");
                Ok(())
            }
        }
    }

    /// Cancel the running stream. The last payload is kept.
    pub fn stop_stream(&self) {
        if self.cancel() {
            self.inner.lifecycle.emit(LifecycleKind::Stopped, None);
        }
        self.inner.state.modify(|s| {
            s.is_streaming = false;
            s.is_loading = false;
        });
    }

    /// The last payload received.
    pub fn data(&self) -> Option<T> {
        self.inner.state.read(|s| s.data.clone())
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.state.read(|s| s.is_streaming)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read(|s| s.is_loading)
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.read(|s| s.error.clone())
    }

    pub fn params(&self) -> Option<P> {
        lock(&self.inner.params).clone()
    }

    pub fn snapshot(&self) -> StreamSnapshot<T> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot<T>> {
        self.inner.state.subscribe()
    }

    /// Register a listener for one kind of lifecycle event. Returns the
    /// listener id.
    #[cfg(feature = "emitter")]
    pub fn on<F>(&self, kind: LifecycleKind, listener: F) -> String
    where
        F: Fn(StreamLifecycle) + Send + Sync + 'static,
    {
        self.inner.lifecycle.on(kind, listener)
    }

    fn open(&self, params: &P) -> Result<()> {
        let stream = match (self.inner.create_stream)(params) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(store = %self.inner.name, error = %err, "failed to open stream");
                self.inner.state.modify(|s| {
                    s.is_streaming = false;
                    s.is_loading = false;
                    s.error = Some(err.user_message());
                });
                return Err(err);
            }
        };

        let epoch = self.inner.epoch.next();
        self.inner.state.modify(|s| {
            s.is_streaming = true;
            s.is_loading = true;
            s.error = None;
        });
        self.inner.lifecycle.emit(LifecycleKind::Started, None);
        debug!(store = %self.inner.name, epoch, "stream opened");

        let handle = tokio::spawn(consume(Arc::downgrade(&self.inner), epoch, stream));
        *lock(&self.inner.consumer) = Some(handle);
        Ok(())
    }

    /// Abort the consumer task, if any. Returns whether one was running.
    fn cancel(&self) -> bool {
        self.inner.epoch.next();
        match lock(&self.inner.consumer).take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }
}

async fn consume<P, T>(
    store: Weak<Inner<P, T>>,
    epoch: u64,
    mut stream: BoxStream<'static, Result<T>>,
) {
    loop {
        let item = stream.next().await;
        let Some(inner) = store.upgrade() else {
            return;
        };
        if !inner.epoch.is_current(epoch) {
            return;
        }

        match item {
            Some(Ok(data)) => {
                inner.state.modify(|s| {
                    s.data = Some(data);
                    s.error = None;
                    s.is_loading = false;
                    s.last_updated = Some(Utc::now());
                });
                inner.lifecycle.emit(LifecycleKind::Data, None);
            }
            Some(Err(err)) => {
                warn!(store = %inner.name, error = %err, "stream failed");
                let message = err.user_message();
                inner.state.modify(|s| {
                    s.error = Some(message.clone());
                    s.is_streaming = false;
                    s.is_loading = false;
                });
                inner.lifecycle.emit(LifecycleKind::Error, Some(message));
                return;
            }
            None => {
                debug!(store = %inner.name, "stream ended");
                inner.state.modify(|s| {
                    s.is_streaming = false;
                    s.is_loading = false;
                });
                inner.lifecycle.emit(LifecycleKind::End, None);
                return;
            }
        }
    }
}
