//! Client-side stores that keep backend data in sync with a UI.
//!
//! Each store owns a backend client built from connection params, tracks
//! loading and error state, and publishes snapshots through a
//! `tokio::sync::watch` channel.
//!
//! - [`SingleMethodStore`]: one request/response call per input.
//! - [`PageableStore`]: cursor pagination with reset and append.
//! - [`StreamStore`]: keeps the latest payload of a server-push stream.
//! - [`OptimisticStore`]: read-through data with optimistic writes,
//!   debounced full writes, queued partial updates and per-operation
//!   rollback.
//! - [`WriteQueue`]: bounded-concurrency FIFO runner behind the updates.

mod config;
mod connection;
mod error;
mod optimistic;
mod pageable;
mod queue;
mod single;
mod state;
mod stream;

#[cfg(feature = "grpc")]
pub mod grpc;

pub use config::{StoreConfig, DEFAULT_DEBOUNCE_MS, DEFAULT_QUEUE_CONCURRENCY};
pub use connection::{Blank, ClientFactory, ClientSlot};
pub use error::{Result, StoreError, UNKNOWN_ERROR};
pub use optimistic::{
    HistoryEntry, MergeFn, OpHistory, OpId, OpKind, OptimisticSnapshot, OptimisticStore,
    OptimisticStoreBuilder, ProcessResponseFn, ReadFn, WriteFn, WriteMode,
};
pub use pageable::{
    CallType, FetchFn, Page, PageMetrics, PageableSnapshot, PageableStore, PageableStoreBuilder,
    END_OF_DATA,
};
pub use queue::{FaultHandler, QueueStats, WriteQueue};
pub use single::{MethodFn, SingleMethodSnapshot, SingleMethodStore, SingleMethodStoreBuilder};
pub use state::{Generation, Published};
pub use stream::{
    LifecycleKind, StreamFactory, StreamLifecycle, StreamSnapshot, StreamStore, StreamStoreBuilder,
};

// Re-export the EventEmitter backing stream lifecycle events
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
