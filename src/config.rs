//! Store configuration.
//!
//! Every builder accepts a `StoreConfig`. Defaults match the behaviour most
//! UIs want (300 ms write debounce, three concurrent queued updates), and the
//! same struct can be loaded from JSON so an application can tune stores
//! without recompiling.
//!
//! ```
//! use std::time::Duration;
//! use grpc_store::StoreConfig;
//!
//! let config = StoreConfig::named("missions")
//!     .with_debounce(Duration::from_millis(150))
//!     .with_queue_concurrency(5);
//! assert_eq!(config.debounce(), Some(Duration::from_millis(150)));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_QUEUE_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name used in log fields.
    pub name: String,
    /// Quiet period before a coalesced optimistic write is sent. `0` sends
    /// every write immediately.
    pub debounce_ms: u64,
    /// Maximum number of partial updates in flight at once.
    pub queue_concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            queue_concurrency: DEFAULT_QUEUE_CONCURRENCY,
        }
    }
}

impl StoreConfig {
    /// Default configuration with the given store name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the write debounce window. `Duration::ZERO` disables debouncing.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_ms = window.as_millis() as u64;
        self
    }

    pub fn without_debounce(self) -> Self {
        self.with_debounce(Duration::ZERO)
    }

    pub fn with_queue_concurrency(mut self, limit: usize) -> Self {
        self.queue_concurrency = limit;
        self
    }

    /// The debounce window, or `None` when writes are sent immediately.
    pub fn debounce(&self) -> Option<Duration> {
        (self.debounce_ms > 0).then(|| Duration::from_millis(self.debounce_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_concurrency == 0 {
            return Err(StoreError::Config(
                "queue_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
