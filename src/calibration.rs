//! Time calibration measurements and records.
//!
//! A calibration round trip is a link-level exchange: the DOR card sends a
//! timing pulse, the instrument answers, and both sides latch their clocks.
//! The result is a [`CalibrationSample`]. The engine wraps it with the
//! mainboard ID and host time into a [`TcalRecord`] for the data stream, and
//! into a [`ClockMeasurement`] for the clock monitor.

use bytes::{BufMut, Bytes, BytesMut};

/// Samples in each received calibration waveform.
pub const WAVEFORM_LEN: usize = 64;

/// Record type tag for calibration records in the data stream.
pub const TCAL_RECORD_TYPE: u32 = 202;

/// Encoded size of a [`TcalRecord`].
pub const TCAL_RECORD_LEN: usize = 4 + 4 + 8 + 8 + 4 * 8 + 2 * WAVEFORM_LEN * 2;

/// One calibration round trip as reported by the link driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationSample {
    /// DOR clock when the pulse left the host side
    pub dor_tx: u64,
    /// DOR clock when the instrument's answer arrived
    pub dor_rx: u64,
    /// Instrument clock when the pulse arrived
    pub dom_rx: u64,
    /// Instrument clock when its answer left
    pub dom_tx: u64,
    /// Waveform of the instrument's answer as seen by the DOR
    pub dor_waveform: [i16; WAVEFORM_LEN],
    /// Waveform of the DOR pulse as seen by the instrument
    pub dom_waveform: [i16; WAVEFORM_LEN],
}

impl CalibrationSample {
    /// Sample with flat waveforms.
    pub fn from_ticks(dor_tx: u64, dor_rx: u64, dom_rx: u64, dom_tx: u64) -> Self {
        Self {
            dor_tx,
            dor_rx,
            dom_rx,
            dom_tx,
            dor_waveform: [0; WAVEFORM_LEN],
            dom_waveform: [0; WAVEFORM_LEN],
        }
    }

    /// Instrument tick at the midpoint of its receive/transmit pair.
    pub fn dom_midpoint(&self) -> u64 {
        self.dom_rx + self.dom_tx.saturating_sub(self.dom_rx) / 2
    }

    /// Round-trip time in DOR ticks minus the instrument's turnaround.
    pub fn round_trip(&self) -> u64 {
        self.dor_rx
            .saturating_sub(self.dor_tx)
            .saturating_sub(self.dom_tx.saturating_sub(self.dom_rx))
    }
}

/// Calibration record forwarded to the data processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcalRecord {
    /// Mainboard ID of the instrument
    pub mainboard_id: u64,
    /// Host monotonic time of the measurement in nanoseconds
    pub host_nanos: u64,
    /// The measurement
    pub sample: CalibrationSample,
}

impl TcalRecord {
    /// Encode the fixed big-endian record layout.
    ///
    /// ```text
    /// length:u32 type:u32 mbid:u64 host_nanos:u64
    /// dor_tx:u64 dor_rx:u64 dom_rx:u64 dom_tx:u64
    /// dor_waveform:[i16; 64] dom_waveform:[i16; 64]
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TCAL_RECORD_LEN);
        buf.put_u32(TCAL_RECORD_LEN as u32);
        buf.put_u32(TCAL_RECORD_TYPE);
        buf.put_u64(self.mainboard_id);
        buf.put_u64(self.host_nanos);
        buf.put_u64(self.sample.dor_tx);
        buf.put_u64(self.sample.dor_rx);
        buf.put_u64(self.sample.dom_rx);
        buf.put_u64(self.sample.dom_tx);
        for sample in self.sample.dor_waveform.iter().chain(&self.sample.dom_waveform) {
            buf.put_i16(*sample);
        }
        buf.freeze()
    }
}

/// Measurement handed to the clock monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockMeasurement {
    /// Hardware ID of the channel
    pub hardware_id: String,
    /// Host monotonic time of the measurement in nanoseconds
    pub host_nanos: u64,
    /// The raw round trip
    pub sample: CalibrationSample,
}

/// Correlation between host monotonic time and the instrument clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRelationship {
    /// Instrument clock tick
    pub dom_tick: u64,
    /// Host monotonic nanoseconds at that tick
    pub host_nanos: u64,
}
