//! Time calibration cycle.

use tracing::{trace, warn};

use super::{AcquisitionEngine, AcquisitionState};
use crate::calibration::{CalibrationSample, ClockMeasurement, ClockRelationship, TcalRecord};
use crate::collaborators::StreamCategory;
use crate::error::{AcquisitionError, Result};
use crate::link::LinkDriver;

impl<D: LinkDriver> AcquisitionEngine<D> {
    /// One calibration round trip that tolerates link failure.
    ///
    /// Returns `Ok(false)` when the round trip itself failed; that only
    /// widens the window until the next calibration. A failure of the data
    /// processor still propagates.
    pub fn attempt_calibration(&mut self) -> Result<bool> {
        match self.state {
            AcquisitionState::Initialized
            | AcquisitionState::Configured
            | AcquisitionState::Running(_)
            | AcquisitionState::FlasherRunning(_) => {}
            _ => return Err(self.invalid_state("calibrate")),
        }
        match self.calibrate() {
            Ok(_) => Ok(true),
            Err(AcquisitionError::Calibration { channel, source }) => {
                warn!(channel = %channel, error = %source, "calibration round trip failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// One calibration round trip; any failure propagates.
    ///
    /// The sample is forwarded as a `Tcal` record, handed to the clock
    /// processor and recorded as the current clock relationship.
    pub(crate) fn calibrate(&mut self) -> Result<CalibrationSample> {
        let address = self.address;
        self.watchdog.ping();
        let read = self.driver.read_calibration(&address);
        self.watchdog.ping();
        let sample = match read {
            Ok(sample) => sample,
            Err(source) => {
                self.stats.calibration_failures += 1;
                return Err(AcquisitionError::Calibration {
                    channel: address.to_string(),
                    source,
                });
            }
        };
        let host_nanos = self.host_nanos();

        let record = TcalRecord {
            mainboard_id: self.mainboard_id,
            host_nanos,
            sample: sample.clone(),
        };
        self.data.process(StreamCategory::Tcal, record.encode())?;

        let hardware_id = self
            .channel
            .as_ref()
            .map(|c| c.hardware_id().to_string())
            .unwrap_or_default();
        self.clock.process(ClockMeasurement {
            hardware_id,
            host_nanos,
            sample: sample.clone(),
        });
        self.data
            .counters()
            .record_clock_relationship(ClockRelationship {
                dom_tick: sample.dom_rx,
                host_nanos,
            });

        trace!(channel = %address, dom_rx = sample.dom_rx, host_nanos, "calibrated");
        self.stats.calibrations += 1;
        self.last_calibration = Some(sample.clone());
        Ok(sample)
    }
}
