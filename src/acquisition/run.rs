//! Run transitions.
//!
//! Starting a run (data or flasher) is followed by a calibration round trip
//! whose instrument tick, resolved by the data processor, is the run's time
//! origin. If that fails the state does not change.

use tracing::{info, instrument, warn};

use super::polling::PollSchedule;
use super::{AcquisitionEngine, AcquisitionState};
use crate::collaborators::{StreamCategory, UtcTime};
use crate::descriptor::FlasherConfig;
use crate::error::Result;
use crate::link::LinkDriver;
use crate::protocol::MessageClient;

impl<D: LinkDriver> AcquisitionEngine<D> {
    /// Start a data run. Returns the run's UTC origin.
    #[instrument(skip(self), fields(channel = %self.address))]
    pub fn begin_run(&mut self) -> Result<UtcTime> {
        if self.state != AcquisitionState::Configured {
            return Err(self.invalid_state("begin run"));
        }
        self.exchange(MessageClient::begin_run)?;
        let origin = self.resolve_time_origin()?;
        self.enter_run(AcquisitionState::Running(self.settings.drain_mode));
        info!(%origin, "run started");
        Ok(origin)
    }

    /// Start a flasher run. Returns the run's UTC origin.
    #[instrument(skip(self), fields(channel = %self.address))]
    pub fn begin_flasher_run(&mut self, flasher: &FlasherConfig) -> Result<UtcTime> {
        if self.state != AcquisitionState::Configured {
            return Err(self.invalid_state("begin flasher run"));
        }
        self.exchange(|c| c.begin_flasher_run(flasher))?;
        let origin = self.resolve_time_origin()?;
        self.enter_run(AcquisitionState::FlasherRunning(self.settings.drain_mode));
        info!(%origin, "flasher run started");
        Ok(origin)
    }

    /// Change flasher settings mid-run. Returns the time the change took
    /// effect.
    #[instrument(skip(self), fields(channel = %self.address))]
    pub fn change_flasher_run(&mut self, flasher: &FlasherConfig) -> Result<UtcTime> {
        if !matches!(self.state, AcquisitionState::FlasherRunning(_)) {
            return Err(self.invalid_state("change flasher run"));
        }
        self.exchange(|c| c.change_flasher_run(flasher))?;
        let effective = self.resolve_time_origin()?;
        info!(%effective, "flasher settings changed");
        Ok(effective)
    }

    /// Stop the run, keeping the streams open.
    #[instrument(skip(self), fields(channel = %self.address))]
    pub fn pause_run(&mut self) -> Result<()> {
        self.stop_run("pause run")?;
        info!("run paused");
        Ok(())
    }

    /// Stop the run and signal end-of-stream on every category.
    #[instrument(skip(self), fields(channel = %self.address))]
    pub fn end_run(&mut self) -> Result<()> {
        self.stop_run("end run")?;
        for category in StreamCategory::ALL {
            self.data.eos(category)?;
        }
        info!("run ended");
        Ok(())
    }

    fn stop_run(&mut self, operation: &'static str) -> Result<()> {
        if !self.state.is_running() {
            return Err(self.invalid_state(operation));
        }
        self.exchange(MessageClient::end_run)?;
        if !self.batch.is_empty() {
            warn!(dropped = self.batch.len(), "discarding unflushed interval batch");
            self.batch.reset();
        }
        self.state = AcquisitionState::Configured;
        Ok(())
    }

    fn resolve_time_origin(&mut self) -> Result<UtcTime> {
        let sample = self.calibrate()?;
        Ok(self.data.resolve_utc_time(sample.dom_rx)?)
    }

    fn enter_run(&mut self, state: AcquisitionState) {
        self.batch.reset();
        self.schedule = PollSchedule::default();
        self.state = state;
    }
}
