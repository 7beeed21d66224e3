//! Wall clock used to stamp local mutations.
//!
//! Last-writer-wins compares `updated_at` timestamps, so every local
//! mutation is stamped from a [`Clock`]. Tests inject a [`ManualClock`] to
//! control ordering exactly.

use crate::Timestamp;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of mutation timestamps (milliseconds since the Unix epoch).
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given timestamp.
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start),
        }
    }

    /// Set the current time.
    pub fn set(&self, millis: Timestamp) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward and return the new value.
    pub fn advance(&self, millis: u64) -> Timestamp {
        self.millis.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Largest timestamp the engine keeps; storage holds timestamps as `i64`.
pub const MAX_TIMESTAMP: Timestamp = i64::MAX as Timestamp;

/// Read a timestamp from a wire value.
///
/// Accepts RFC 3339 strings and integer milliseconds. Anything else
/// (including a missing value) is treated as the epoch, so a remote record
/// without a timestamp never wins against local state. Values past
/// [`MAX_TIMESTAMP`] are clamped to it.
pub fn parse_timestamp(value: Option<&serde_json::Value>) -> Timestamp {
    let millis = match value {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis().max(0) as Timestamp)
            .unwrap_or(0),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    };
    millis.min(MAX_TIMESTAMP)
}

/// Render a timestamp the way it goes over the wire (RFC 3339, millisecond
/// precision, UTC).
pub fn format_timestamp(millis: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
