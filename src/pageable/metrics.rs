use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a page load appended to or replaced the current items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Fetch,
    Reset,
}

/// Counters and latencies for a pageable store. Observational only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetrics {
    pub total_calls: u64,
    pub fetch_calls: u64,
    pub reset_calls: u64,
    pub failed_calls: u64,
    pub last_call_type: Option<CallType>,
    pub last_call_at: Option<DateTime<Utc>>,
    pub last_call_duration: Option<Duration>,
    /// Mean duration over every completed call, successful or not.
    pub average_duration: Duration,
}

impl PageMetrics {
    /// Record a completed call.
    pub fn record(&mut self, call_type: CallType, duration: Duration, at: DateTime<Utc>) {
        self.count(call_type, at);

        let timed = u128::from(self.total_calls);
        self.average_duration = if timed <= 1 {
            duration
        } else {
            let total = self
                .average_duration
                .as_nanos()
                .saturating_mul(timed - 1)
                .saturating_add(duration.as_nanos());
            Duration::from_nanos(u64::try_from(total / timed).unwrap_or(u64::MAX))
        };
        self.last_call_duration = Some(duration);
    }

    /// Record a call that failed.
    pub fn record_failure(&mut self, call_type: CallType, duration: Duration, at: DateTime<Utc>) {
        self.failed_calls += 1;
        self.record(call_type, duration, at);
    }

    fn count(&mut self, call_type: CallType, at: DateTime<Utc>) {
        self.total_calls += 1;
        match call_type {
            CallType::Fetch => self.fetch_calls += 1,
            CallType::Reset => self.reset_calls += 1,
        }
        self.last_call_type = Some(call_type);
        self.last_call_at = Some(at);
    }
}
