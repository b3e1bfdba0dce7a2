//! Polling-mode drain.
//!
//! Each stream has its own read period. A cycle reads every stream whose
//! deadline has passed and forwards each payload on its own.

use std::time::Duration;

use bytes::Bytes;

use super::AcquisitionEngine;
use crate::collaborators::StreamCategory;
use crate::config::DrainMode;
use crate::error::Result;
use crate::link::LinkDriver;
use crate::protocol::MessageClient;

/// Next-read deadline of one stream, in host nanoseconds.
#[derive(Debug, Clone, Copy, Default)]
struct Deadline {
    next: Option<u64>,
}

impl Deadline {
    fn is_due(&self, now: u64) -> bool {
        self.next.map_or(true, |next| now >= next)
    }

    fn advance(&mut self, now: u64, period: Duration) {
        let period = period.as_nanos() as u64;
        self.next = Some(self.next.unwrap_or(now) + period);
    }
}

/// Per-stream deadlines; reset at every run start.
#[derive(Debug, Clone, Default)]
pub(crate) struct PollSchedule {
    hit: Deadline,
    moni: Deadline,
    supernova: Deadline,
}

impl<D: LinkDriver> AcquisitionEngine<D> {
    /// Run one polling cycle at host time `host_nanos`. Returns `true` if no
    /// stream produced data.
    pub fn run_polling_cycle(&mut self, host_nanos: u64) -> Result<bool> {
        if self.state.drain_mode() != Some(DrainMode::Polling) {
            return Err(self.invalid_state("run polling cycle"));
        }
        self.stats.cycles += 1;
        let mut forwarded = 0usize;

        if self.schedule.hit.is_due(host_nanos) {
            let depth = self.settings.hit_pipeline_depth;
            let payloads = self.exchange(|c| c.get_data_pipelined(depth))?;
            self.schedule
                .hit
                .advance(host_nanos, Duration::from_millis(self.settings.hit_period_ms));
            for payload in payloads {
                self.forward(StreamCategory::Hit, payload)?;
                forwarded += 1;
            }
        }

        if self.schedule.moni.is_due(host_nanos) {
            let payload = self.exchange(MessageClient::get_moni)?;
            self.schedule
                .moni
                .advance(host_nanos, Duration::from_millis(self.settings.moni_period_ms));
            if !payload.is_empty() {
                self.forward(StreamCategory::Moni, payload)?;
                forwarded += 1;
            }
        }

        if self.supernova_enabled && self.schedule.supernova.is_due(host_nanos) {
            let payload = self.read_supernova()?;
            self.schedule.supernova.advance(
                host_nanos,
                Duration::from_millis(self.settings.supernova_period_ms),
            );
            self.forward(StreamCategory::Supernova, payload)?;
            forwarded += 1;
        }

        let idle = forwarded == 0;
        if idle {
            self.stats.idle_cycles += 1;
        }
        Ok(idle)
    }

    /// Supernova scalers are produced on a fixed cadence, so keep asking
    /// until a non-empty buffer arrives.
    fn read_supernova(&mut self) -> Result<Bytes> {
        let retry = self.settings.supernova_retry();
        loop {
            let payload = self.exchange(MessageClient::get_supernova)?;
            if !payload.is_empty() {
                return Ok(payload);
            }
            self.watchdog.sleep(retry)?;
        }
    }

    fn forward(&mut self, category: StreamCategory, payload: Bytes) -> Result<()> {
        self.data.process(category, payload)?;
        self.stats.record_payload(category);
        Ok(())
    }
}
