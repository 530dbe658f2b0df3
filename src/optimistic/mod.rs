//! Read-through store with optimistic writes and per-operation rollback.

mod debounce;
mod history;
mod store;

pub use history::{HistoryEntry, OpHistory, OpId, OpKind};
pub use store::{
    MergeFn, OptimisticSnapshot, OptimisticStore, OptimisticStoreBuilder, ProcessResponseFn,
    ReadFn, WriteFn, WriteMode,
};
