//! Typed instrument operations.
//!
//! One method per command table entry. Setters encode their arguments
//! big-endian into the request payload and discard the (empty) response.

use bytes::{BufMut, Bytes, BytesMut};

use super::client::MessageClient;
use super::message::MessageType;
use crate::descriptor::{
    ChargeStampSource, CompressionMode, DaqMode, DataFormat, EngineeringFormat, FlasherConfig,
    HistogramConfig, LcMode, LcType, MoniIntervals, SelfLcConfig, SupernovaConfig, TriggerMode,
};
use crate::error::ProtocolResult;
use crate::link::LinkPort;

impl<P: LinkPort> MessageClient<P> {
    fn set(&mut self, kind: MessageType, payload: &[u8]) -> ProtocolResult<()> {
        self.command(kind, payload).map(drop)
    }

    /// Mainboard ID as 12 lowercase hex digits, or `None` when the
    /// instrument reports zero.
    pub fn get_dom_id(&mut self) -> ProtocolResult<Option<String>> {
        let payload = self.command(MessageType::GetDomId, &[])?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&payload);
        let id = u64::from_be_bytes(raw);
        Ok((id != 0).then(|| format!("{:012x}", id)))
    }

    /// Application release string.
    pub fn get_domapp_release(&mut self) -> ProtocolResult<String> {
        let payload = self.command(MessageType::GetDomappRelease, &[])?;
        let text = String::from_utf8_lossy(&payload);
        Ok(text.trim_end_matches('\0').trim().to_string())
    }

    /// Read one hit buffer.
    pub fn get_data(&mut self) -> ProtocolResult<Bytes> {
        self.command(MessageType::GetData, &[])
    }

    /// Read up to `depth` hit buffers in one pipelined burst.
    pub fn get_data_pipelined(&mut self, depth: usize) -> ProtocolResult<Vec<Bytes>> {
        self.pipelined(MessageType::GetData, depth)
    }

    /// Read one monitoring buffer.
    pub fn get_moni(&mut self) -> ProtocolResult<Bytes> {
        self.command(MessageType::GetMoni, &[])
    }

    /// Read one supernova scaler buffer.
    pub fn get_supernova(&mut self) -> ProtocolResult<Bytes> {
        self.command(MessageType::GetSupernova, &[])
    }

    /// Ask for one interval of data. The responses are read with
    /// [`MessageClient::receive_frame`].
    pub fn request_interval(&mut self) -> ProtocolResult<()> {
        self.send_request(MessageType::GetInterval, &[]).map(drop)
    }

    /// Start a data run.
    pub fn begin_run(&mut self) -> ProtocolResult<()> {
        self.set(MessageType::BeginRun, &[])
    }

    /// End (or pause) the current run.
    pub fn end_run(&mut self) -> ProtocolResult<()> {
        self.set(MessageType::EndRun, &[])
    }

    /// Start a flasher run.
    pub fn begin_flasher_run(&mut self, flasher: &FlasherConfig) -> ProtocolResult<()> {
        self.set(MessageType::BeginFlasherRun, &encode_flasher(flasher))
    }

    /// Change flasher settings without stopping the run.
    pub fn change_flasher_run(&mut self, flasher: &FlasherConfig) -> ProtocolResult<()> {
        self.set(MessageType::ChangeFlasherRun, &encode_flasher(flasher))
    }

    /// Monitoring record periods.
    pub fn set_moni_intervals(&mut self, intervals: &MoniIntervals) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(intervals.hardware);
        buf.put_u32(intervals.config);
        self.set(MessageType::SetMoniIntervals, &buf)
    }

    /// Fast monitoring period.
    pub fn set_fast_moni_interval(&mut self, interval: u32) -> ProtocolResult<()> {
        self.set(MessageType::SetFastMoniInterval, &interval.to_be_bytes())
    }

    /// Hit record format.
    pub fn set_data_format(&mut self, format: DataFormat) -> ProtocolResult<()> {
        self.set(MessageType::SetDataFormat, &[format.code()])
    }

    /// Hit compression.
    pub fn set_compression_mode(&mut self, mode: CompressionMode) -> ProtocolResult<()> {
        self.set(MessageType::SetCompressionMode, &[mode.code()])
    }

    /// Engineering-format sample counts.
    pub fn set_engineering_format(&mut self, format: &EngineeringFormat) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(format.fadc_samples);
        buf.put_slice(&format.atwd_samples);
        self.set(MessageType::SetEngineeringFormat, &buf)
    }

    /// Lookback memory depth.
    pub fn set_lbm_depth(&mut self, depth: u8) -> ProtocolResult<()> {
        self.set(MessageType::SetLbmDepth, &[depth])
    }

    /// Enable supernova scalers.
    pub fn enable_supernova(&mut self, supernova: &SupernovaConfig) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u32(supernova.deadtime);
        buf.put_u8(u8::from(supernova.spe));
        self.set(MessageType::EnableSupernova, &buf)
    }

    /// Disable supernova scalers.
    pub fn disable_supernova(&mut self) -> ProtocolResult<()> {
        self.set(MessageType::DisableSupernova, &[])
    }

    /// Pedestal subtraction on or off.
    pub fn set_pedestal_subtraction(&mut self, enabled: bool) -> ProtocolResult<()> {
        self.set(MessageType::SetPedestalSubtraction, &[u8::from(enabled)])
    }

    /// Chargestamp histogramming.
    pub fn set_chargestamp_histogram(&mut self, histogram: &HistogramConfig) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u32(histogram.interval);
        buf.put_u16(histogram.prescale);
        self.set(MessageType::SetChargeStampHistogram, &buf)
    }

    /// Switch PMT high voltage on.
    pub fn enable_hv(&mut self) -> ProtocolResult<()> {
        self.set(MessageType::EnableHv, &[])
    }

    /// Switch PMT high voltage off.
    pub fn disable_hv(&mut self) -> ProtocolResult<()> {
        self.set(MessageType::DisableHv, &[])
    }

    /// High voltage setpoint in DAC units.
    pub fn set_hv(&mut self, hv: u16) -> ProtocolResult<()> {
        self.set(MessageType::SetHv, &hv.to_be_bytes())
    }

    /// Write one DAC channel.
    pub fn set_dac(&mut self, channel: u8, value: u16) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8(channel);
        buf.put_u16(value);
        self.set(MessageType::SetDac, &buf)
    }

    /// Select the analog multiplexer input.
    pub fn select_mux(&mut self, channel: u8) -> ProtocolResult<()> {
        self.set(MessageType::SelectMux, &[channel])
    }

    /// Trigger source.
    pub fn set_trigger_mode(&mut self, mode: TriggerMode) -> ProtocolResult<()> {
        self.set(MessageType::SetTriggerMode, &[mode.code()])
    }

    /// Pulser or beacon rate.
    pub fn set_pulser_rate(&mut self, rate: u16) -> ProtocolResult<()> {
        self.set(MessageType::SetPulserRate, &rate.to_be_bytes())
    }

    /// Front-end pulser on.
    pub fn pulser_on(&mut self) -> ProtocolResult<()> {
        self.set(MessageType::PulserOn, &[])
    }

    /// Front-end pulser off.
    pub fn pulser_off(&mut self) -> ProtocolResult<()> {
        self.set(MessageType::PulserOff, &[])
    }

    /// Scaler deadtime.
    pub fn set_scaler_deadtime(&mut self, deadtime: u32) -> ProtocolResult<()> {
        self.set(MessageType::SetScalerDeadtime, &deadtime.to_be_bytes())
    }

    /// Local coincidence requirement.
    pub fn set_lc_mode(&mut self, mode: LcMode) -> ProtocolResult<()> {
        self.set(MessageType::SetLcMode, &[mode.code()])
    }

    /// Local coincidence windows.
    pub fn set_lc_window(&mut self, pre: u32, post: u32) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(pre);
        buf.put_u32(post);
        self.set(MessageType::SetLcWindow, &buf)
    }

    /// Local coincidence signalling type.
    pub fn set_lc_type(&mut self, lc_type: LcType) -> ProtocolResult<()> {
        self.set(MessageType::SetLcType, &[lc_type.code()])
    }

    /// Local coincidence transmit mode.
    pub fn set_lc_tx(&mut self, tx: u8) -> ProtocolResult<()> {
        self.set(MessageType::SetLcTx, &[tx])
    }

    /// Local coincidence source.
    pub fn set_lc_source(&mut self, source: u8) -> ProtocolResult<()> {
        self.set(MessageType::SetLcSource, &[source])
    }

    /// Local coincidence span.
    pub fn set_lc_span(&mut self, span: u8) -> ProtocolResult<()> {
        self.set(MessageType::SetLcSpan, &[span])
    }

    /// Local coincidence cable length corrections.
    pub fn set_lc_cable_lengths(&mut self, lengths: &[u16; 8]) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(16);
        for length in lengths {
            buf.put_u16(*length);
        }
        self.set(MessageType::SetLcCableLengths, &buf)
    }

    /// Chargestamp source.
    pub fn set_chargestamp_source(&mut self, source: &ChargeStampSource) -> ProtocolResult<()> {
        let payload = [
            u8::from(source.atwd),
            u8::from(source.auto_channel),
            source.channel,
        ];
        self.set(MessageType::SetChargeStampSource, &payload)
    }

    /// Alternate trigger mode.
    pub fn set_alt_trigger_mode(&mut self, mode: TriggerMode) -> ProtocolResult<()> {
        self.set(MessageType::SetAltTriggerMode, &[mode.code()])
    }

    /// DAQ readout mode.
    pub fn set_daq_mode(&mut self, mode: DaqMode) -> ProtocolResult<()> {
        self.set(MessageType::SetDaqMode, &[mode.code()])
    }

    /// Self local coincidence.
    pub fn set_self_lc(&mut self, self_lc: &SelfLcConfig) -> ProtocolResult<()> {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(self_lc.mode);
        buf.put_u32(self_lc.window);
        self.set(MessageType::SetSelfLc, &buf)
    }

    /// Onboard LED brightness.
    pub fn set_onboard_led(&mut self, brightness: u8) -> ProtocolResult<()> {
        self.set(MessageType::SetOnboardLed, &[brightness])
    }
}

fn encode_flasher(flasher: &FlasherConfig) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u8(flasher.brightness);
    buf.put_u8(flasher.width);
    buf.put_u16(flasher.delay);
    buf.put_u16(flasher.mask);
    buf.put_u16(flasher.rate);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flasher_payload_layout() {
        let flasher = FlasherConfig {
            brightness: 127,
            width: 20,
            delay: 0x0102,
            mask: 0x0fff,
            rate: 610,
        };
        let buf = encode_flasher(&flasher);
        assert_eq!(buf.as_ref(), &[127, 20, 1, 2, 0x0f, 0xff, 0x02, 0x62]);
        assert!(MessageType::BeginFlasherRun.spec().request.accepts(buf.len()));
    }
}
