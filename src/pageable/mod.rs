//! Cursor-paginated store with reset/append semantics and call metrics.

mod metrics;
mod page;
mod store;

pub use metrics::{CallType, PageMetrics};
pub use page::{Page, END_OF_DATA};
pub use store::{FetchFn, PageableSnapshot, PageableStore, PageableStoreBuilder};
