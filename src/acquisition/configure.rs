//! Configuration pass.
//!
//! Fields are applied in a fixed order. Features that older firmware lacks
//! are sent through `apply_optional`, which tags each call
//! [`FeatureOutcome::Applied`] or [`FeatureOutcome::Unsupported`]. The
//! extended-mode gate runs before any command is sent.

use tracing::{error, info, instrument, warn};

use super::{AcquisitionEngine, AcquisitionState};
use crate::collaborators::ExtendedModePolicy;
use crate::descriptor::{ConfigurationDescriptor, PulserMode, TriggerMode, MUX_OFF};
use crate::error::{AcquisitionError, ProtocolResult, Result};
use crate::link::LinkDriver;
use crate::protocol::{MessageClient, MessageType};

/// Result of one optional configuration command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureOutcome {
    /// The instrument accepted the command
    Applied,
    /// The instrument refused it; the feature is not active
    Unsupported,
}

/// Summary of a configuration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    /// Optional commands the firmware refused, in application order
    pub unsupported: Vec<MessageType>,
}

impl ConfigureReport {
    /// Whether every requested feature was applied.
    pub fn is_complete(&self) -> bool {
        self.unsupported.is_empty()
    }
}

impl<D: LinkDriver> AcquisitionEngine<D> {
    /// Apply a configuration descriptor.
    ///
    /// Fails before sending anything if the descriptor uses extended-mode
    /// features the policy forbids. Valid from `Initialized` or `Configured`.
    /// Once the first command is sent the channel is `Initialized` until every
    /// command has succeeded, so a failed pass never leaves it runnable.
    #[instrument(skip_all, fields(channel = %self.address))]
    pub fn configure(
        &mut self,
        descriptor: &ConfigurationDescriptor,
        policy: &ExtendedModePolicy,
    ) -> Result<ConfigureReport> {
        match self.state {
            AcquisitionState::Initialized | AcquisitionState::Configured => {}
            _ => return Err(self.invalid_state("configure")),
        }
        check_extended_mode(descriptor, policy)?;
        self.state = AcquisitionState::Initialized;
        self.supernova_enabled = false;

        let mut report = ConfigureReport::default();
        let d = descriptor;

        self.exchange(|c| c.set_moni_intervals(&d.moni_intervals))?;
        if let Some(interval) = d.fast_moni_interval {
            self.apply_optional(MessageType::SetFastMoniInterval, &mut report, |c| {
                c.set_fast_moni_interval(interval)
            })?;
        }

        self.exchange(|c| c.set_data_format(d.data_format))?;
        self.exchange(|c| c.set_compression_mode(d.compression))?;
        self.exchange(|c| c.set_engineering_format(&d.engineering_format))?;

        match d.hv {
            Some(hv) => {
                self.exchange(MessageClient::enable_hv)?;
                self.exchange(|c| c.set_hv(hv))?;
            }
            None => self.exchange(MessageClient::disable_hv)?,
        }

        for (channel, value) in d.dacs.iter().enumerate() {
            self.exchange(|c| c.set_dac(channel as u8, *value))?;
        }
        self.exchange(|c| c.select_mux(d.mux.unwrap_or(MUX_OFF)))?;

        self.exchange(|c| c.set_trigger_mode(d.trigger_mode))?;
        if d.trigger_mode != TriggerMode::Flasher {
            match d.pulser.mode {
                PulserMode::Pulser => self.exchange(MessageClient::pulser_on)?,
                PulserMode::Beacon => self.exchange(MessageClient::pulser_off)?,
            }
            self.exchange(|c| c.set_pulser_rate(d.pulser.rate))?;
        }

        let lc = &d.local_coincidence;
        self.exchange(|c| c.set_lc_mode(lc.mode))?;
        self.exchange(|c| c.set_lc_type(lc.lc_type))?;
        self.exchange(|c| c.set_lc_window(lc.pre_window, lc.post_window))?;
        self.exchange(|c| c.set_lc_tx(lc.tx))?;
        self.exchange(|c| c.set_lc_source(lc.source))?;
        self.exchange(|c| c.set_lc_span(lc.span))?;
        self.exchange(|c| c.set_lc_cable_lengths(&lc.cable_lengths))?;

        match &d.supernova {
            Some(supernova) => self.exchange(|c| c.enable_supernova(supernova))?,
            None => self.exchange(MessageClient::disable_supernova)?,
        }
        self.exchange(|c| c.set_scaler_deadtime(d.scaler_deadtime))?;

        if let Some(enabled) = d.pedestal_subtraction {
            self.apply_optional(MessageType::SetPedestalSubtraction, &mut report, |c| {
                c.set_pedestal_subtraction(enabled)
            })?;
        }
        if let Some(source) = &d.chargestamp_source {
            self.apply_optional(MessageType::SetChargeStampSource, &mut report, |c| {
                c.set_chargestamp_source(source)
            })?;
        }
        if let Some(histogram) = &d.histogram {
            self.apply_optional(MessageType::SetChargeStampHistogram, &mut report, |c| {
                c.set_chargestamp_histogram(histogram)
            })?;
        }
        if let Some(depth) = d.lbm_depth {
            self.apply_optional(MessageType::SetLbmDepth, &mut report, |c| {
                c.set_lbm_depth(depth)
            })?;
        }

        if let Some(mode) = d.alt_trigger_mode {
            self.exchange(|c| c.set_alt_trigger_mode(mode))?;
        }
        if let Some(mode) = d.daq_mode {
            self.exchange(|c| c.set_daq_mode(mode))?;
        }
        if let Some(self_lc) = &d.self_lc {
            self.exchange(|c| c.set_self_lc(self_lc))?;
        }
        if let Some(brightness) = d.onboard_led {
            self.exchange(|c| c.set_onboard_led(brightness))?;
        }

        self.supernova_enabled = d.supernova_enabled();
        self.state = AcquisitionState::Configured;
        info!(
            unsupported = report.unsupported.len(),
            supernova = self.supernova_enabled,
            "channel configured"
        );
        Ok(report)
    }

    /// Send a command the firmware may not know. A command-status failure is
    /// logged and recorded in `report`; any other failure propagates.
    fn apply_optional(
        &mut self,
        kind: MessageType,
        report: &mut ConfigureReport,
        op: impl FnOnce(&mut MessageClient<D::Port>) -> ProtocolResult<()>,
    ) -> Result<FeatureOutcome> {
        match self.exchange(op) {
            Ok(()) => Ok(FeatureOutcome::Applied),
            Err(AcquisitionError::Protocol(e)) if e.is_command_status() => {
                warn!(command = ?kind, error = %e, "feature not supported by firmware, skipped");
                report.unsupported.push(kind);
                Ok(FeatureOutcome::Unsupported)
            }
            Err(e) => Err(e),
        }
    }
}

fn check_extended_mode(
    descriptor: &ConfigurationDescriptor,
    policy: &ExtendedModePolicy,
) -> Result<()> {
    if policy.is_enabled() {
        return Ok(());
    }
    let violations = descriptor.extended_features();
    if violations.is_empty() {
        return Ok(());
    }
    if policy.enforcement_active() {
        return Err(AcquisitionError::ExtendedModeViolation { violations });
    }
    for feature in &violations {
        error!(%feature, "extended mode disabled, applying anyway (enforcement overridden)");
    }
    Ok(())
}
