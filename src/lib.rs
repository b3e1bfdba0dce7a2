//! # omdaq
//!
//! Per-channel acquisition control for optical-module instruments reached
//! through a DOR link card.
//!
//! For each channel the crate brings the instrument from an unknown power-on
//! state into its acquisition application, applies a hardware configuration,
//! runs the data and flasher run lifecycle, drains hit, monitoring and
//! supernova data in interval or polling mode, and anchors instrument time to
//! host time with periodic calibration round trips.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: framed request/response client, the command table, the
//!   bootloader text exchange and one typed method per instrument command.
//! - **`acquisition`**: [`AcquisitionEngine`], the per-channel state machine
//!   (initialization and recovery, configuration, run transitions, the two
//!   drain strategies and calibration).
//! - **`link`**: the [`LinkDriver`]/[`LinkPort`] traits the engine talks
//!   through, plus an in-memory mock instrument.
//! - **`collaborators`**: traits for the shared consumers of a channel
//!   ([`DataProcessor`], [`ClockProcessor`], [`Watchdog`]) and the
//!   extended-mode policy.
//! - **`descriptor`**: the hardware configuration snapshot.
//! - **`calibration`**: calibration samples and the record layout sent
//!   downstream.
//! - **`watchdog`**: a thread-backed [`Watchdog`] implementation.
//! - **`config`** / **`logging`**: engine settings (figment) and tracing
//!   setup.
//! - **`error`**: error types per layer.
//! - **`testing`**: recording collaborators used by the test suite.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use omdaq::link::mock::MockLinkDriver;
//! use omdaq::link::{ChannelAddress, WirePosition};
//! use omdaq::testing::{EventLog, ManualWatchdog, RecordingClock, RecordingProcessor};
//! use omdaq::{AcquisitionEngine, Collaborators, ConfigurationDescriptor, EngineSettings, ExtendedModePolicy};
//!
//! let log = EventLog::new();
//! let collaborators = Collaborators {
//!     data: Arc::new(RecordingProcessor::new(log.clone())),
//!     clock: Arc::new(RecordingClock::new(log.clone())),
//!     watchdog: Arc::new(ManualWatchdog::new(log)),
//! };
//! let mut engine = AcquisitionEngine::new(
//!     ChannelAddress::new(0, 0, WirePosition::A),
//!     MockLinkDriver::new(),
//!     collaborators,
//!     EngineSettings::default(),
//! );
//!
//! let hardware_id = engine.initialize(false)?;
//! assert_eq!(hardware_id, "57bcb2a3c4f1");
//! engine.configure(&ConfigurationDescriptor::default(), &ExtendedModePolicy::disabled())?;
//! engine.begin_run()?;
//! engine.end_run()?;
//! engine.close();
//! # Ok::<(), omdaq::AcquisitionError>(())
//! ```

pub mod acquisition;
pub mod calibration;
pub mod collaborators;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod link;
pub mod logging;
pub mod protocol;
pub mod testing;
pub mod watchdog;

pub use acquisition::{
    AcquisitionEngine, AcquisitionState, Collaborators, ConfigureReport, EngineStats,
    FeatureOutcome, IntervalBatch,
};
pub use calibration::{CalibrationSample, ClockMeasurement, TcalRecord};
pub use collaborators::{
    ClockProcessor, DataCounters, DataProcessor, ExtendedModePolicy, StreamCategory,
    TimeoutAction, UtcTime, Watchdog,
};
pub use config::{DrainMode, EngineSettings};
pub use descriptor::{ConfigurationDescriptor, ExtendedFeature, FlasherConfig};
pub use error::{AcquisitionError, ConfigError, ProcessorError, ProtocolError};
pub use link::{ChannelAddress, HardwareChannel, LinkDriver, LinkPort};
pub use protocol::{MessageClient, MessageType};
pub use watchdog::HeartbeatWatchdog;
