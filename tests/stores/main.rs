//! Store integration tests.

mod stream;
mod optimistic;
