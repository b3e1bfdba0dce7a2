//! Command table for the instrument application.
//!
//! Each command is a [`MessageType`] variant; its wire identity and payload
//! layouts live in a single static table so dispatch is a lookup, not a
//! match spread across the client.

use std::fmt;

/// Command facilities understood by the instrument application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Facility {
    /// Identity and housekeeping
    MessageHandler = 1,
    /// Hardware setters (HV, DACs, triggers, LC, pulser)
    SlowControl = 2,
    /// Data readout and data-format setters
    DataAccess = 3,
    /// Run control
    ExperimentControl = 4,
}

/// Shape of a request or response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLayout {
    /// No payload
    Empty,
    /// Exactly this many bytes
    Fixed(usize),
    /// Any length up to the link maximum
    Variable,
}

impl PayloadLayout {
    /// Whether `len` satisfies this layout.
    pub fn accepts(self, len: usize) -> bool {
        match self {
            Self::Empty => len == 0,
            Self::Fixed(n) => len == n,
            Self::Variable => true,
        }
    }
}

/// Static description of one command.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Command this entry describes
    pub kind: MessageType,
    /// Wire facility
    pub facility: Facility,
    /// Wire subtype
    pub subtype: u8,
    /// Request payload layout
    pub request: PayloadLayout,
    /// Response payload layout
    pub response: PayloadLayout,
}

/// Every command the client can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Mainboard identity
    GetDomId,
    /// Application release string
    GetDomappRelease,
    /// Hit data readout
    GetData,
    /// Monitoring record readout
    GetMoni,
    /// Supernova scaler readout
    GetSupernova,
    /// Request one interval of hit, moni and supernova data
    GetInterval,
    /// Hardware and configuration monitoring periods
    SetMoniIntervals,
    /// Fast monitoring period
    SetFastMoniInterval,
    /// Hit record format
    SetDataFormat,
    /// Hit compression mode
    SetCompressionMode,
    /// Engineering-format sample counts
    SetEngineeringFormat,
    /// Lookback memory depth
    SetLbmDepth,
    /// Enable supernova scalers with deadtime
    EnableSupernova,
    /// Disable supernova scalers
    DisableSupernova,
    /// Toggle pedestal subtraction
    SetPedestalSubtraction,
    /// Chargestamp histogram parameters
    SetChargeStampHistogram,
    /// Enable PMT high voltage
    EnableHv,
    /// Disable PMT high voltage
    DisableHv,
    /// PMT high voltage setpoint
    SetHv,
    /// Write one DAC channel
    SetDac,
    /// Analog multiplexer channel
    SelectMux,
    /// Trigger mode
    SetTriggerMode,
    /// Pulser or beacon rate
    SetPulserRate,
    /// Front-end pulser on
    PulserOn,
    /// Front-end pulser off (beacon mode)
    PulserOff,
    /// Scaler deadtime
    SetScalerDeadtime,
    /// Local coincidence mode
    SetLcMode,
    /// Local coincidence pre/post window
    SetLcWindow,
    /// Local coincidence type
    SetLcType,
    /// Local coincidence transmit mode
    SetLcTx,
    /// Local coincidence source
    SetLcSource,
    /// Local coincidence span
    SetLcSpan,
    /// Local coincidence cable length corrections
    SetLcCableLengths,
    /// Chargestamp source
    SetChargeStampSource,
    /// Alternate trigger mode
    SetAltTriggerMode,
    /// DAQ mode
    SetDaqMode,
    /// Self local coincidence
    SetSelfLc,
    /// Onboard LED brightness
    SetOnboardLed,
    /// Start a data run
    BeginRun,
    /// End or pause a run
    EndRun,
    /// Start a flasher run
    BeginFlasherRun,
    /// Change flasher settings mid-run
    ChangeFlasherRun,
}

use Facility::{DataAccess, ExperimentControl, MessageHandler, SlowControl};
use PayloadLayout::{Empty, Fixed, Variable};

const fn spec(
    kind: MessageType,
    facility: Facility,
    subtype: u8,
    request: PayloadLayout,
    response: PayloadLayout,
) -> CommandSpec {
    CommandSpec {
        kind,
        facility,
        subtype,
        request,
        response,
    }
}

/// Indexed by `MessageType as usize`.
static COMMAND_TABLE: [CommandSpec; 42] = [
    spec(MessageType::GetDomId, MessageHandler, 10, Empty, Fixed(8)),
    spec(MessageType::GetDomappRelease, MessageHandler, 24, Empty, Variable),
    spec(MessageType::GetData, DataAccess, 11, Empty, Variable),
    spec(MessageType::GetMoni, DataAccess, 12, Empty, Variable),
    spec(MessageType::GetSupernova, DataAccess, 27, Empty, Variable),
    spec(MessageType::GetInterval, DataAccess, 33, Empty, Variable),
    spec(MessageType::SetMoniIntervals, DataAccess, 13, Fixed(8), Empty),
    spec(MessageType::SetFastMoniInterval, DataAccess, 32, Fixed(4), Empty),
    spec(MessageType::SetDataFormat, DataAccess, 17, Fixed(1), Empty),
    spec(MessageType::SetCompressionMode, DataAccess, 16, Fixed(1), Empty),
    spec(MessageType::SetEngineeringFormat, DataAccess, 14, Fixed(5), Empty),
    spec(MessageType::SetLbmDepth, DataAccess, 34, Fixed(1), Empty),
    spec(MessageType::EnableSupernova, DataAccess, 25, Fixed(5), Empty),
    spec(MessageType::DisableSupernova, DataAccess, 26, Empty, Empty),
    spec(MessageType::SetPedestalSubtraction, DataAccess, 31, Fixed(1), Empty),
    spec(MessageType::SetChargeStampHistogram, DataAccess, 35, Fixed(6), Empty),
    spec(MessageType::EnableHv, SlowControl, 16, Empty, Empty),
    spec(MessageType::DisableHv, SlowControl, 18, Empty, Empty),
    spec(MessageType::SetHv, SlowControl, 14, Fixed(2), Empty),
    spec(MessageType::SetDac, SlowControl, 13, Fixed(3), Empty),
    spec(MessageType::SelectMux, SlowControl, 33, Fixed(1), Empty),
    spec(MessageType::SetTriggerMode, SlowControl, 31, Fixed(1), Empty),
    spec(MessageType::SetPulserRate, SlowControl, 35, Fixed(2), Empty),
    spec(MessageType::PulserOn, SlowControl, 37, Empty, Empty),
    spec(MessageType::PulserOff, SlowControl, 38, Empty, Empty),
    spec(MessageType::SetScalerDeadtime, SlowControl, 43, Fixed(4), Empty),
    spec(MessageType::SetLcMode, SlowControl, 45, Fixed(1), Empty),
    spec(MessageType::SetLcWindow, SlowControl, 47, Fixed(8), Empty),
    spec(MessageType::SetLcType, SlowControl, 50, Fixed(1), Empty),
    spec(MessageType::SetLcTx, SlowControl, 52, Fixed(1), Empty),
    spec(MessageType::SetLcSource, SlowControl, 54, Fixed(1), Empty),
    spec(MessageType::SetLcSpan, SlowControl, 56, Fixed(1), Empty),
    spec(MessageType::SetLcCableLengths, SlowControl, 58, Fixed(16), Empty),
    spec(MessageType::SetChargeStampSource, SlowControl, 62, Fixed(3), Empty),
    spec(MessageType::SetAltTriggerMode, SlowControl, 64, Fixed(1), Empty),
    spec(MessageType::SetDaqMode, SlowControl, 66, Fixed(1), Empty),
    spec(MessageType::SetSelfLc, SlowControl, 68, Fixed(5), Empty),
    spec(MessageType::SetOnboardLed, SlowControl, 70, Fixed(1), Empty),
    spec(MessageType::BeginRun, ExperimentControl, 12, Empty, Empty),
    spec(MessageType::EndRun, ExperimentControl, 13, Empty, Empty),
    spec(MessageType::BeginFlasherRun, ExperimentControl, 27, Fixed(8), Empty),
    spec(MessageType::ChangeFlasherRun, ExperimentControl, 29, Fixed(8), Empty),
];

impl MessageType {
    /// Table entry for this command.
    pub fn spec(self) -> &'static CommandSpec {
        &COMMAND_TABLE[self as usize]
    }

    /// Wire facility byte.
    pub fn facility(self) -> u8 {
        self.spec().facility as u8
    }

    /// Wire subtype byte.
    pub fn subtype(self) -> u8 {
        self.spec().subtype
    }

    /// Facility/subtype pair.
    pub fn wire_kind(self) -> (u8, u8) {
        (self.facility(), self.subtype())
    }

    /// Reverse lookup from a received facility/subtype pair.
    pub fn from_wire(facility: u8, subtype: u8) -> Option<Self> {
        COMMAND_TABLE
            .iter()
            .find(|entry| entry.facility as u8 == facility && entry.subtype == subtype)
            .map(|entry| entry.kind)
    }

    /// Every command, in table order.
    pub fn all() -> impl Iterator<Item = MessageType> {
        COMMAND_TABLE.iter().map(|entry| entry.kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (facility, subtype) = self.wire_kind();
        write!(f, "{:?}({}/{})", self, facility, subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_is_indexed_by_discriminant() {
        for (index, entry) in COMMAND_TABLE.iter().enumerate() {
            assert_eq!(entry.kind as usize, index, "{:?} out of place", entry.kind);
        }
    }

    #[test]
    fn test_wire_identities_are_unique() {
        let mut seen = HashSet::new();
        for kind in MessageType::all() {
            assert!(seen.insert(kind.wire_kind()), "duplicate wire id for {}", kind);
        }
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(MessageType::from_wire(3, 11), Some(MessageType::GetData));
        assert_eq!(MessageType::from_wire(4, 13), Some(MessageType::EndRun));
        assert_eq!(MessageType::from_wire(9, 9), None);
    }

    #[test]
    fn test_layout_acceptance() {
        assert!(PayloadLayout::Empty.accepts(0));
        assert!(!PayloadLayout::Empty.accepts(1));
        assert!(PayloadLayout::Fixed(3).accepts(3));
        assert!(!PayloadLayout::Fixed(3).accepts(2));
        assert!(PayloadLayout::Variable.accepts(4000));
    }
}
