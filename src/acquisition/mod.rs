//! Per-channel acquisition engine.
//!
//! [`AcquisitionEngine`] owns one hardware channel: its link driver, its
//! protocol client and its lifecycle state. One thread drives one engine; the
//! data processor, clock processor and watchdog are shared with the rest of
//! the host.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ─initialize─▶ Initializing ─▶ Initialized ─configure─▶ Configured
//!                                                                      │  ▲
//!                               begin_run / begin_flasher_run          ▼  │ pause_run / end_run
//!                                                     Running / FlasherRunning
//! any ─close─▶ Closed
//! ```
//!
//! Initialization and recovery, configuration, run transitions, the interval
//! drain, the polling drain and calibration each live in their own file.

mod batch;
mod calibrate;
mod configure;
mod guard;
mod init;
mod interval;
mod polling;
mod run;

pub use batch::IntervalBatch;
pub use configure::{ConfigureReport, FeatureOutcome};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::calibration::CalibrationSample;
use crate::collaborators::{ClockProcessor, DataProcessor, StreamCategory, Watchdog};
use crate::config::{DrainMode, EngineSettings};
use crate::error::{AcquisitionError, ProtocolResult, Result};
use crate::link::{ChannelAddress, HardwareChannel, LinkDriver};
use crate::protocol::MessageClient;

use polling::PollSchedule;

/// Lifecycle position of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Nothing done yet
    Uninitialized,
    /// Bringing the instrument into the application
    Initializing,
    /// Application running and identity known
    Initialized,
    /// Configuration applied
    Configured,
    /// Data run in progress
    Running(DrainMode),
    /// Flasher run in progress
    FlasherRunning(DrainMode),
    /// Released; terminal
    Closed,
}

impl AcquisitionState {
    /// Drain mode of an active run.
    pub fn drain_mode(self) -> Option<DrainMode> {
        match self {
            Self::Running(mode) | Self::FlasherRunning(mode) => Some(mode),
            _ => None,
        }
    }

    /// Whether a run is in progress.
    pub fn is_running(self) -> bool {
        self.drain_mode().is_some()
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Initialized => write!(f, "initialized"),
            Self::Configured => write!(f, "configured"),
            Self::Running(mode) => write!(f, "running ({:?})", mode),
            Self::FlasherRunning(mode) => write!(f, "flasher running ({:?})", mode),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Running counters for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Drain cycles run
    pub cycles: u64,
    /// Drain cycles that produced no data
    pub idle_cycles: u64,
    /// Hit payloads forwarded
    pub hit_payloads: u64,
    /// Monitoring payloads forwarded
    pub moni_payloads: u64,
    /// Supernova payloads forwarded
    pub supernova_payloads: u64,
    /// Successful calibrations
    pub calibrations: u64,
    /// Failed calibration round trips
    pub calibration_failures: u64,
    /// Largest interval batch seen
    pub batch_high_water: usize,
}

impl EngineStats {
    fn record_payload(&mut self, category: StreamCategory) {
        match category {
            StreamCategory::Hit => self.hit_payloads += 1,
            StreamCategory::Moni => self.moni_payloads += 1,
            StreamCategory::Supernova => self.supernova_payloads += 1,
            StreamCategory::Tcal => {}
        }
    }
}

/// Shared collaborators handed to every engine.
#[derive(Clone)]
pub struct Collaborators {
    /// Downstream data consumer
    pub data: Arc<dyn DataProcessor>,
    /// Cross-channel clock monitor
    pub clock: Arc<dyn ClockProcessor>,
    /// Liveness monitor for this channel's thread
    pub watchdog: Arc<dyn Watchdog>,
}

/// Acquisition engine for one channel.
pub struct AcquisitionEngine<D: LinkDriver> {
    address: ChannelAddress,
    driver: D,
    client: Option<MessageClient<D::Port>>,
    data: Arc<dyn DataProcessor>,
    clock: Arc<dyn ClockProcessor>,
    watchdog: Arc<dyn Watchdog>,
    settings: EngineSettings,
    state: AcquisitionState,
    channel: Option<HardwareChannel>,
    mainboard_id: u64,
    supernova_enabled: bool,
    batch: IntervalBatch,
    schedule: PollSchedule,
    stats: EngineStats,
    epoch: Instant,
    last_calibration: Option<CalibrationSample>,
}

impl<D: LinkDriver> AcquisitionEngine<D> {
    /// Engine for the channel at `address`.
    pub fn new(
        address: ChannelAddress,
        driver: D,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Self {
        let batch = IntervalBatch::new(settings.interval_batch_capacity);
        Self {
            address,
            driver,
            client: None,
            data: collaborators.data,
            clock: collaborators.clock,
            watchdog: collaborators.watchdog,
            settings,
            state: AcquisitionState::Uninitialized,
            channel: None,
            mainboard_id: 0,
            supernova_enabled: false,
            batch,
            schedule: PollSchedule::default(),
            stats: EngineStats::default(),
            epoch: Instant::now(),
            last_calibration: None,
        }
    }

    /// Physical address.
    pub fn address(&self) -> ChannelAddress {
        self.address
    }

    /// Current lifecycle state.
    pub fn current_state(&self) -> AcquisitionState {
        self.state
    }

    /// Resolved channel identity, once initialized.
    pub fn hardware_channel(&self) -> Option<&HardwareChannel> {
        self.channel.as_ref()
    }

    /// Running counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Most recent successful calibration.
    pub fn last_calibration(&self) -> Option<&CalibrationSample> {
        self.last_calibration.as_ref()
    }

    /// Settings the engine was created with.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Release the client and the link. Idempotent.
    pub fn close(&mut self) {
        if self.state == AcquisitionState::Closed {
            return;
        }
        self.client = None;
        self.driver.release(&self.address);
        self.state = AcquisitionState::Closed;
        info!(channel = %self.address, "channel closed");
    }

    /// Host monotonic nanoseconds since the engine was created.
    fn host_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn invalid_state(&self, operation: &'static str) -> AcquisitionError {
        AcquisitionError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Run one client operation, pinging the watchdog on either side.
    fn exchange<T>(
        &mut self,
        op: impl FnOnce(&mut MessageClient<D::Port>) -> ProtocolResult<T>,
    ) -> Result<T> {
        let state = self.state;
        let client = self.client.as_mut().ok_or(AcquisitionError::InvalidState {
            operation: "talk to the instrument",
            state,
        })?;
        self.watchdog.ping();
        let result = op(client);
        self.watchdog.ping();
        Ok(result?)
    }
}

impl<D: LinkDriver> Drop for AcquisitionEngine<D> {
    fn drop(&mut self) {
        self.close();
    }
}
