use serde::{Deserialize, Serialize};

#[cfg(feature = "emitter")]
use std::sync::Mutex;

#[cfg(feature = "emitter")]
use chrono::Utc;

#[cfg(feature = "emitter")]
use event_emitter_rs::EventEmitter;

#[cfg(feature = "emitter")]
use crate::state::lock;

/// Stream lifecycle transitions announced to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Started,
    Data,
    Error,
    End,
    Stopped,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Started => "started",
            LifecycleKind::Data => "data",
            LifecycleKind::Error => "error",
            LifecycleKind::End => "end",
            LifecycleKind::Stopped => "stopped",
        }
    }
}

/// Payload delivered with every lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLifecycle {
    pub kind: LifecycleKind,
    /// Unix timestamp in milliseconds.
    pub at_ms: i64,
    pub message: Option<String>,
}

#[cfg(feature = "emitter")]
impl StreamLifecycle {
    pub(crate) fn now(kind: LifecycleKind, message: Option<String>) -> Self {
        Self {
            kind,
            at_ms: Utc::now().timestamp_millis(),
            message,
        }
    }
}

/// Fans lifecycle events out to registered listeners.
///
/// Listeners run on the emitter's own threads, so they observe events
/// shortly after the state change rather than synchronously.
#[cfg(feature = "emitter")]
pub(crate) struct LifecycleEmitter {
    emitter: Mutex<EventEmitter>,
}

#[cfg(feature = "emitter")]
impl LifecycleEmitter {
    pub(crate) fn new() -> Self {
        Self {
            emitter: Mutex::new(EventEmitter::new()),
        }
    }

    pub(crate) fn on<F>(&self, kind: LifecycleKind, listener: F) -> String
    where
        F: Fn(StreamLifecycle) + Send + Sync + 'static,
    {
        lock(&self.emitter).on(kind.as_str(), listener)
    }

    pub(crate) fn emit(&self, kind: LifecycleKind, message: Option<String>) {
        let event = StreamLifecycle::now(kind, message);
        lock(&self.emitter).emit(kind.as_str(), event);
    }
}

#[cfg(not(feature = "emitter"))]
pub(crate) struct LifecycleEmitter;

#[cfg(not(feature = "emitter"))]
impl LifecycleEmitter {
    pub(crate) fn new() -> Self {
        LifecycleEmitter
    }

    pub(crate) fn emit(&self, _kind: LifecycleKind, _message: Option<String>) {}
}
