//! Interfaces the engine consumes from its supervisor.
//!
//! The data and clock processors are shared across every channel of the
//! host, so they take `&self` and must be `Send + Sync`. The watchdog is
//! shared between the acquisition thread and its monitor thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::calibration::{ClockMeasurement, ClockRelationship};
use crate::error::{Interrupted, ProcessorError};

/// Category of a buffer forwarded downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamCategory {
    /// Hit records
    Hit,
    /// Monitoring records
    Moni,
    /// Supernova scaler records
    Supernova,
    /// Time calibration records
    Tcal,
}

impl StreamCategory {
    /// Every category, in end-of-stream order.
    pub const ALL: [StreamCategory; 4] = [Self::Hit, Self::Moni, Self::Supernova, Self::Tcal];
}

impl fmt::Display for StreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hit => "hit",
            Self::Moni => "moni",
            Self::Supernova => "supernova",
            Self::Tcal => "tcal",
        };
        f.write_str(name)
    }
}

/// Absolute time in tenths of nanoseconds since the start of the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UtcTime(pub u64);

impl UtcTime {
    /// Raw value in tenths of nanoseconds.
    pub fn tenths_of_ns(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.0 / 10_000_000_000;
        let remainder = self.0 % 10_000_000_000;
        write!(f, "{}.{:010}", seconds, remainder)
    }
}

/// Counters a data processor keeps per channel.
///
/// The engine records every calibration's clock relationship here.
#[derive(Debug, Default)]
pub struct DataCounters {
    clock: Mutex<Option<ClockRelationship>>,
    clock_samples: AtomicU64,
}

impl DataCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a host/instrument clock correlation.
    pub fn record_clock_relationship(&self, relationship: ClockRelationship) {
        *self.clock.lock() = Some(relationship);
        self.clock_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recent clock correlation.
    pub fn latest_clock_relationship(&self) -> Option<ClockRelationship> {
        *self.clock.lock()
    }

    /// Number of correlations recorded.
    pub fn clock_samples(&self) -> u64 {
        self.clock_samples.load(Ordering::Relaxed)
    }
}

/// Downstream consumer of a channel's buffers.
pub trait DataProcessor: Send + Sync {
    /// Forward one buffer.
    fn process(&self, category: StreamCategory, buffer: Bytes) -> Result<(), ProcessorError>;

    /// Forward an interval's buffers in arrival order.
    fn process_batch(&self, entries: &[(StreamCategory, Bytes)]) -> Result<(), ProcessorError>;

    /// Signal that a stream has ended.
    fn eos(&self, category: StreamCategory) -> Result<(), ProcessorError>;

    /// Translate an instrument clock tick into absolute time.
    fn resolve_utc_time(&self, device_tick: u64) -> Result<UtcTime, ProcessorError>;

    /// Per-channel counters.
    fn counters(&self) -> &DataCounters;
}

/// Cross-channel clock monitor. Must return promptly.
pub trait ClockProcessor: Send + Sync {
    /// Hand over one measurement.
    fn process(&self, measurement: ClockMeasurement);
}

/// What the watchdog does when its deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Interrupt the acquisition thread's next sleep and keep going
    InterruptOnly,
    /// Abort the channel
    Fatal,
}

/// Liveness monitor for one acquisition thread.
pub trait Watchdog: Send + Sync {
    /// Reset the deadline.
    fn ping(&self);

    /// Sleep while counting as alive. Fails if the watchdog interrupted the
    /// sleep.
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted>;

    /// Change the expiry action, returning the previous one.
    fn set_timeout_action(&self, action: TimeoutAction) -> TimeoutAction;

    /// Change the deadline length, returning the previous one.
    fn set_timeout_threshold(&self, threshold: Duration) -> Duration;

    /// Acknowledge an interruption the caller recovered from.
    fn handle_interrupted(&self, context: &str);
}

/// Process-wide extended-mode policy, passed explicitly to `configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedModePolicy {
    enabled: bool,
    enforce: bool,
}

impl ExtendedModePolicy {
    /// Policy with explicit flags.
    pub fn new(enabled: bool, enforce: bool) -> Self {
        Self { enabled, enforce }
    }

    /// Extended mode off and enforced.
    pub fn disabled() -> Self {
        Self::new(false, true)
    }

    /// Extended mode on.
    pub fn enabled() -> Self {
        Self::new(true, true)
    }

    /// Extended mode off, with enforcement overridden.
    pub fn overridden() -> Self {
        Self::new(false, false)
    }

    /// Whether extended features are allowed.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a violation fails configuration.
    pub fn enforcement_active(&self) -> bool {
        self.enforce
    }
}

impl Default for ExtendedModePolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_keep_latest_relationship() {
        let counters = DataCounters::new();
        assert!(counters.latest_clock_relationship().is_none());

        counters.record_clock_relationship(ClockRelationship {
            dom_tick: 10,
            host_nanos: 100,
        });
        counters.record_clock_relationship(ClockRelationship {
            dom_tick: 20,
            host_nanos: 600,
        });
        assert_eq!(counters.clock_samples(), 2);
        assert_eq!(counters.latest_clock_relationship().unwrap().dom_tick, 20);
    }

    #[test]
    fn test_utc_display() {
        assert_eq!(UtcTime(12_345_000_000_007).to_string(), "1234.5000000007");
    }
}
