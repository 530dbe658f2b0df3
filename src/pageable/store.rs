use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::metrics::{CallType, PageMetrics};
use super::page::{Page, END_OF_DATA};
use crate::config::StoreConfig;
use crate::connection::{ClientFactory, ClientSlot};
use crate::error::Result;
use crate::state::{lock, Generation, Published};

/// Backend call fetching one page. The cursor is `None` for the first page.
pub type FetchFn<P, C, I, T, M> =
    Arc<dyn Fn(C, P, I, Option<String>) -> BoxFuture<'static, Result<Page<T, M>>> + Send + Sync>;

/// Observable state of a [`PageableStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct PageableSnapshot<T, M> {
    pub items: Vec<T>,
    pub metadata: Option<M>,
    /// Cursor of the next page; `Some("")` once the end was reached.
    pub cursor: Option<String>,
    pub has_reached_end: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub metrics: PageMetrics,
}

impl<T, M> Default for PageableSnapshot<T, M> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            metadata: None,
            cursor: None,
            has_reached_end: false,
            is_loading: false,
            error: None,
            last_updated: None,
            metrics: PageMetrics::default(),
        }
    }
}

pub struct PageableStoreBuilder<P, C, I, T, M> {
    config: StoreConfig,
    create_client: ClientFactory<P, C>,
    fetch: FetchFn<P, C, I, T, M>,
}

impl<P, C, I, T, M> PageableStoreBuilder<P, C, I, T, M>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> PageableStore<P, C, I, T, M> {
        PageableStore {
            inner: Arc::new(Inner {
                name: self.config.name,
                create_client: self.create_client,
                fetch: self.fetch,
                slot: Mutex::new(ClientSlot::new()),
                input: Mutex::new(None),
                state: Published::new(PageableSnapshot::default()),
                generation: Generation::default(),
            }),
        }
    }
}

struct Inner<P, C, I, T, M> {
    name: String,
    create_client: ClientFactory<P, C>,
    fetch: FetchFn<P, C, I, T, M>,
    slot: Mutex<ClientSlot<P, C>>,
    input: Mutex<Option<I>>,
    state: Published<PageableSnapshot<T, M>>,
    generation: Generation,
}

/// A store that loads a list page by page.
///
/// `load_next_page(false)` appends the next page using the stored cursor,
/// `load_next_page(true)` starts over and replaces the items. Once a page
/// arrives without a cursor the store stops fetching until the next reset.
pub struct PageableStore<P, C, I, T, M = ()> {
    inner: Arc<Inner<P, C, I, T, M>>,
}

impl<P, C, I, T, M> Clone for PageableStore<P, C, I, T, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C, I, T, M> PageableStore<P, C, I, T, M>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn builder<F, G, Fut>(create_client: F, fetch: G) -> PageableStoreBuilder<P, C, I, T, M>
    where
        F: Fn(&P) -> Result<C> + Send + Sync + 'static,
        G: Fn(C, P, I, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Page<T, M>>> + Send + 'static,
    {
        PageableStoreBuilder {
            config: StoreConfig::named("pageable"),
            create_client: Arc::new(create_client),
            fetch: Arc::new(move |client, params, input, cursor| {
                fetch(client, params, input, cursor).boxed()
            }),
        }
    }

    /// Build a new client from `params` and reload from the first page.
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
        self.load_next_page(true).await;
        replaced
    }

    /// Replace the filter and reload from the first page.
    pub async fn set_input(&self, input: I) {
        *lock(&self.inner.input) = Some(input);
        self.inner.state.modify(|s| s.has_reached_end = false);
        self.load_next_page(true).await;
    }

    /// Load the next page, or the first page again when `reset` is true.
    pub async fn load_next_page(&self, reset: bool) {
        let checkout = lock(&self.inner.slot).checkout();
        let input = lock(&self.inner.input).clone();
        let ((client, params), input) = match (checkout, input) {
            (Ok(pair), Some(input)) => (pair, input),
            (Err(err), _) => {
                debug!(store = %self.inner.name, error = %err, "page load skipped");
                return;
            }
            (_, None) => {
                debug!(store = %self.inner.name, "page load skipped: no input");
                return;
            }
        };

        let (reached_end, stored_cursor) = self
            .inner
            .state
            .read(|s| (s.has_reached_end, s.cursor.clone()));

        if reached_end && !reset {
            debug!(store = %self.inner.name, "end of data reached, not fetching");
            return;
        }

        let cursor = if reset { None } else { stored_cursor };
        if !reset && cursor.as_deref() == Some(END_OF_DATA) {
            debug!(store = %self.inner.name, "cursor exhausted, not fetching");
            self.inner.state.modify(|s| s.has_reached_end = true);
            return;
        }

        let call_type = if reset {
            CallType::Reset
        } else {
            CallType::Fetch
        };
        let generation = self.inner.generation.next();
        self.inner.state.modify(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let started = Instant::now();
        let result = (self.inner.fetch)(client, params, input, cursor).await;
        let elapsed = started.elapsed();

        if !self.inner.generation.is_current(generation) {
            debug!(store = %self.inner.name, generation, "dropping stale page");
            return;
        }

        match result {
            Ok(page) => {
                let next_cursor = page.next_cursor();
                debug!(
                    store = %self.inner.name,
                    items = page.data.len(),
                    ?call_type,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "page loaded"
                );
                self.inner.state.modify(|s| {
                    if reset {
                        s.items = page.data;
                    } else {
                        s.items.extend(page.data);
                    }
                    s.has_reached_end = next_cursor == END_OF_DATA;
                    s.cursor = Some(next_cursor);
                    s.metadata = page.metadata;
                    s.is_loading = false;
                    s.error = None;
                    let now = Utc::now();
                    s.last_updated = Some(now);
                    s.metrics.record(call_type, elapsed, now);
                });
            }
            Err(err) => {
                warn!(store = %self.inner.name, error = %err, ?call_type, "page fetch failed");
                self.inner.state.modify(|s| {
                    s.is_loading = false;
                    s.error = Some(err.user_message());
                    s.metrics.record_failure(call_type, elapsed, Utc::now());
                });
            }
        }
    }

    /// Every item loaded so far.
    pub fn items(&self) -> Vec<T> {
        self.inner.state.read(|s| s.items.clone())
    }

    pub fn metadata(&self) -> Option<M> {
        self.inner.state.read(|s| s.metadata.clone())
    }

    pub fn has_reached_end(&self) -> bool {
        self.inner.state.read(|s| s.has_reached_end)
    }

    pub fn metrics(&self) -> PageMetrics {
        self.inner.state.read(|s| s.metrics.clone())
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

    pub fn snapshot(&self) -> PageableSnapshot<T, M> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<PageableSnapshot<T, M>> {
        self.inner.state.subscribe()
    }
}
