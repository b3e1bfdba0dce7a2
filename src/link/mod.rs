//! Hardware link abstraction.
//!
//! The link driver is the host-side card (DOR) giving access to one or more
//! instrument channels. The engine only needs a handful of operations from it,
//! captured by [`LinkDriver`] and the per-channel message port [`LinkPort`].
//!
//! The device-file driver lives outside this crate; [`mock`] provides an
//! in-memory instrument for tests and bench work.

pub mod mock;

use std::fmt;
use std::io;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationSample;

/// Position of an instrument on its wire pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WirePosition {
    /// Upper instrument on the pair
    A,
    /// Lower instrument on the pair
    B,
}

/// Physical address of a channel: card, wire pair and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    /// Link card index
    pub card: u8,
    /// Wire pair on the card
    pub pair: u8,
    /// Position on the pair
    pub position: WirePosition,
}

impl ChannelAddress {
    /// Create a channel address.
    pub fn new(card: u8, pair: u8, position: WirePosition) -> Self {
        Self {
            card,
            pair,
            position,
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pos = match self.position {
            WirePosition::A => 'A',
            WirePosition::B => 'B',
        };
        write!(f, "{}{}{}", self.card, self.pair, pos)
    }
}

/// Fully resolved channel identity.
///
/// Created once the instrument has reported its hardware ID and never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HardwareChannel {
    address: ChannelAddress,
    hardware_id: String,
}

impl HardwareChannel {
    pub(crate) fn new(address: ChannelAddress, hardware_id: String) -> Self {
        Self {
            address,
            hardware_id,
        }
    }

    /// Physical address.
    pub fn address(&self) -> ChannelAddress {
        self.address
    }

    /// Instrument-reported hardware ID (mainboard ID).
    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }
}

impl fmt::Display for HardwareChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.address, self.hardware_id)
    }
}

/// Byte-oriented message port to one instrument.
///
/// `receive` returns whatever fragment the driver has; a fragment may hold a
/// partial frame, several frames, or (in non-blocking mode) nothing.
pub trait LinkPort: Send {
    /// Transmit bytes to the instrument.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Receive the next fragment. Blocks in blocking mode.
    fn receive(&mut self) -> io::Result<Bytes>;
}

/// Host-side link driver for the channels of one card.
pub trait LinkDriver: Send {
    /// Message port type opened for a channel.
    type Port: LinkPort;

    /// Open the message port of a channel.
    fn open(&mut self, channel: &ChannelAddress) -> io::Result<Self::Port>;

    /// Reset the communication state of a channel.
    fn reset(&mut self, channel: &ChannelAddress) -> io::Result<()>;

    /// Hard-reset the instrument into its bootloader.
    fn softboot(&mut self, channel: &ChannelAddress) -> io::Result<()>;

    /// Whether `receive` blocks until data is available.
    fn is_blocking_mode(&self) -> bool;

    /// Run one time-calibration round trip and return the measurement.
    fn read_calibration(&mut self, channel: &ChannelAddress) -> io::Result<CalibrationSample>;

    /// Release any driver resources held for the channel.
    fn release(&mut self, _channel: &ChannelAddress) {}
}
