//! Connection params and the backend client built from them.

mod blank;
mod slot;

pub use blank::Blank;
pub use slot::{ClientFactory, ClientSlot};
