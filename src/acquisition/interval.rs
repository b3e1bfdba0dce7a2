//! Interval-mode drain.
//!
//! One `GET_INTERVAL` request makes the instrument send its buffered hit and
//! monitoring data followed by a supernova frame. The frames are read raw and
//! demultiplexed into the interval batch, then a calibration brackets the
//! batch and the whole batch goes downstream in one call.

use tracing::{debug, trace, warn};

use super::AcquisitionEngine;
use crate::collaborators::StreamCategory;
use crate::config::DrainMode;
use crate::error::{AcquisitionError, ProtocolError, Result};
use crate::link::LinkDriver;
use crate::protocol::{MessageClient, MessageType};

impl<D: LinkDriver> AcquisitionEngine<D> {
    /// Run one interval cycle. Returns `true` if the cycle produced no data,
    /// as a hint to back off.
    pub fn run_interval_cycle(&mut self) -> Result<bool> {
        if self.state.drain_mode() != Some(DrainMode::Interval) {
            return Err(self.invalid_state("run interval cycle"));
        }
        if !self.batch.is_empty() {
            warn!(channel = %self.address, dropped = self.batch.len(), "discarding batch of a failed cycle");
            self.batch.reset();
        }
        self.stats.cycles += 1;

        self.exchange(MessageClient::request_interval)?;
        loop {
            let frame = self.exchange(MessageClient::receive_frame)?;
            let (facility, subtype) = frame.header.kind();
            let (kind, category) = match MessageType::from_wire(facility, subtype) {
                Some(MessageType::GetData) => (MessageType::GetData, StreamCategory::Hit),
                Some(MessageType::GetMoni) => (MessageType::GetMoni, StreamCategory::Moni),
                Some(MessageType::GetSupernova) => {
                    (MessageType::GetSupernova, StreamCategory::Supernova)
                }
                _ => return Err(AcquisitionError::UnexpectedFrame { facility, subtype }),
            };
            if !frame.header.is_success() {
                return Err(ProtocolError::CommandStatus {
                    command: kind,
                    facility,
                    subtype,
                    status: frame.header.status,
                }
                .into());
            }
            trace!(%category, len = frame.payload.len(), "interval frame");
            if !frame.payload.is_empty() {
                self.batch.push(category, frame.payload)?;
            }

            let cycle_done = match category {
                StreamCategory::Supernova => true,
                StreamCategory::Moni => !self.supernova_enabled,
                _ => false,
            };
            if cycle_done {
                break;
            }
        }

        self.attempt_calibration()?;

        let idle = self.batch.is_empty();
        self.stats.batch_high_water = self.batch.high_water_mark();
        if idle {
            self.stats.idle_cycles += 1;
            return Ok(true);
        }
        for (category, _) in self.batch.entries() {
            self.stats.record_payload(*category);
        }
        debug!(channel = %self.address, entries = self.batch.len(), "flushing interval batch");
        let flushed = self.data.process_batch(self.batch.entries());
        self.batch.reset();
        flushed?;
        Ok(false)
    }
}
