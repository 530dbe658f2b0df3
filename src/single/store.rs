use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::connection::{ClientFactory, ClientSlot};
use crate::error::{Result, StoreError};
use crate::state::{lock, Generation, Published};

/// Backend call issued by a single-method store.
pub type MethodFn<P, C, I, T> = Arc<dyn Fn(C, P, I) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Observable state of a [`SingleMethodStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct SingleMethodSnapshot<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for SingleMethodSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
            last_updated: None,
        }
    }
}

pub struct SingleMethodStoreBuilder<P, C, I, T> {
    config: StoreConfig,
    create_client: ClientFactory<P, C>,
    method: MethodFn<P, C, I, T>,
}

impl<P, C, I, T> SingleMethodStoreBuilder<P, C, I, T>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SingleMethodStore<P, C, I, T> {
        SingleMethodStore {
            inner: Arc::new(Inner {
                name: self.config.name,
                create_client: self.create_client,
                method: self.method,
                slot: Mutex::new(ClientSlot::new()),
                input: Mutex::new(None),
                state: Published::new(SingleMethodSnapshot::default()),
                generation: Generation::default(),
            }),
        }
    }
}

struct Inner<P, C, I, T> {
    name: String,
    create_client: ClientFactory<P, C>,
    method: MethodFn<P, C, I, T>,
    slot: Mutex<ClientSlot<P, C>>,
    input: Mutex<Option<I>>,
    state: Published<SingleMethodSnapshot<T>>,
    generation: Generation,
}

/// Wraps one request/response backend method.
///
/// Nothing is sent until both connection params (`set_params`) and an input
/// (`set_input`) are present. Backend failures are absorbed into the
/// snapshot's `error` field and never clear previously loaded data.
///
/// ## Example
///
/// ```
/// use grpc_store::{SingleMethodStore, StoreError};
///
/// # tokio_test_block(async {
/// let store = SingleMethodStore::builder(
///     |endpoint: &String| Ok(endpoint.clone()),
///     |_client: String, _params: String, query: String| async move {
///         Ok::<_, StoreError>(format!("result for {query}"))
///     },
/// )
/// .build();
///
/// store.set_params("https://api".to_string()).unwrap();
/// store.set_input("mission-1".to_string()).await;
/// assert_eq!(store.data().as_deref(), Some("result for mission-1"));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct SingleMethodStore<P, C, I, T> {
    inner: Arc<Inner<P, C, I, T>>,
}

impl<P, C, I, T> Clone for SingleMethodStore<P, C, I, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C, I, T> SingleMethodStore<P, C, I, T>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn builder<F, M, Fut>(create_client: F, method: M) -> SingleMethodStoreBuilder<P, C, I, T>
    where
        F: Fn(&P) -> Result<C> + Send + Sync + 'static,
        M: Fn(C, P, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        SingleMethodStoreBuilder {
            config: StoreConfig::named("single-method"),
            create_client: Arc::new(create_client),
            method: Arc::new(move |client, params, input| method(client, params, input).boxed()),
        }
    }

    /// Store the params and build a new client from them.
    ///
    /// Any call still in flight under the previous params is abandoned: its
    /// response will be dropped when it arrives.
    pub fn set_params(&self, params: P) -> Result<()> {
        let replaced = lock(&self.inner.slot).replace(params, &self.inner.create_client);
        self.inner.generation.next();
        self.inner.state.modify(|s| {
            s.is_loading = false;
            s.error = replaced.as_ref().err().map(StoreError::user_message);
        });
        if let Err(err) = &replaced {
            warn!(store = %self.inner.name, error = %err, "client construction failed");
        }
        replaced
    }

    /// Store the request payload and refresh.
    pub async fn set_input(&self, input: I) {
        *lock(&self.inner.input) = Some(input);
        self.refresh().await;
    }

    /// Refresh if the store is ready, otherwise record why it is not.
    pub async fn refresh(&self) {
        let precondition = if !self.client_ready() {
            Some(StoreError::ClientNotReady)
        } else if lock(&self.inner.input).is_none() {
            Some(StoreError::MissingInput)
        } else {
            None
        };

        if let Some(err) = precondition {
            debug!(store = %self.inner.name, error = %err, "refresh skipped");
            self.inner
                .state
                .modify(|s| s.error = Some(err.user_message()));
            return;
        }

        // Input presence was checked above; a concurrent clear is the only way
        // force_refresh can still fail its precondition.
        if let Err(err) = self.force_refresh().await {
            self.inner
                .state
                .modify(|s| s.error = Some(err.user_message()));
        }
    }

    /// Call the backend unconditionally.
    ///
    /// Returns `Err(StoreError::MissingInput)` without touching state when no
    /// input has been set. Every other failure is recorded in the snapshot.
    pub async fn force_refresh(&self) -> Result<()> {
        let input = lock(&self.inner.input)
            .clone()
            .ok_or(StoreError::MissingInput)?;

        let checkout = lock(&self.inner.slot).checkout();
        let (client, params) = match checkout {
            Ok(pair) => pair,
            Err(err) => {
                self.inner
                    .state
                    .modify(|s| s.error = Some(err.user_message()));
                return Ok(());
            }
        };

        let generation = self.inner.generation.next();
        self.inner.state.modify(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let result = (self.inner.method)(client, params, input).await;

        if !self.inner.generation.is_current(generation) {
            debug!(store = %self.inner.name, generation, "dropping stale response");
            return Ok(());
        }

        match result {
            Ok(data) => self.inner.state.modify(|s| {
                s.data = Some(data);
                s.is_loading = false;
                s.error = None;
                s.last_updated = Some(Utc::now());
            }),
            Err(err) => {
                warn!(store = %self.inner.name, error = %err, "method call failed");
                self.inner.state.modify(|s| {
                    s.is_loading = false;
                    s.error = Some(err.user_message());
                });
            }
        }
        Ok(())
    }

    /// The last successful response.
    pub fn data(&self) -> Option<T> {
        self.inner.state.read(|s| s.data.clone())
    }

    pub fn client_ready(&self) -> bool {
        lock(&self.inner.slot).is_ready()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read(|s| s.is_loading)
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.read(|s| s.error.clone())
    }

    pub fn snapshot(&self) -> SingleMethodSnapshot<T> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SingleMethodSnapshot<T>> {
        self.inner.state.subscribe()
    }
}
