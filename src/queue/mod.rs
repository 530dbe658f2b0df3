//! Bounded-concurrency FIFO queue for backend update calls.

mod write_queue;

pub use write_queue::{FaultHandler, QueueStats, WriteQueue};
