//! Single-method store: one request/response call gated on params and input.

mod store;

pub use store::{MethodFn, SingleMethodSnapshot, SingleMethodStore, SingleMethodStoreBuilder};
