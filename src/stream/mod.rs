//! Long-lived server-push stream consumer.

mod lifecycle;
mod store;

pub use lifecycle::{LifecycleKind, StreamLifecycle};
pub use store::{StreamFactory, StreamSnapshot, StreamStore, StreamStoreBuilder};
