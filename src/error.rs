//! Error types for the acquisition engine.
//!
//! Errors are layered the same way the engine is:
//!
//! - [`ProtocolError`] - failures of a single exchange with the instrument:
//!   link I/O, corrupt frames, mismatched responses and non-success status
//!   codes.
//! - [`ProcessorError`] - failures reported by the downstream data/clock
//!   consumers. These always mean the consumer of the channel's stream is
//!   broken.
//! - [`AcquisitionError`] - the engine-level failure. Any of these tells the
//!   supervisor the channel must be removed from the active set.
//! - [`ConfigError`] - settings loading and validation failures.
//!
//! All types convert into [`AcquisitionError`] with `?`.

use thiserror::Error;

use crate::acquisition::AcquisitionState;
use crate::descriptor::ExtendedFeature;
use crate::protocol::MessageType;

/// Result type alias for protocol-level operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for engine-level operations.
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Errors raised by the message protocol client.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The link failed while sending or receiving.
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be assembled from the received bytes.
    #[error("Corrupt frame: {message}")]
    CorruptFrame {
        /// What was wrong with the bytes
        message: String,
    },

    /// The instrument answered with a non-success status byte.
    #[error("Command {command:?} ({facility}/{subtype}) failed with status {status}")]
    CommandStatus {
        /// Command that was sent
        command: MessageType,
        /// Facility byte of the response
        facility: u8,
        /// Subtype byte of the response
        subtype: u8,
        /// Status byte reported by the instrument
        status: u8,
    },

    /// The response carried a different facility/subtype than the request.
    #[error(
        "Command {command:?} expected response {}/{}, received {}/{}",
        expected.0, expected.1, actual.0, actual.1
    )]
    ResponseMismatch {
        /// Command that was sent
        command: MessageType,
        /// Facility/subtype of the request
        expected: (u8, u8),
        /// Facility/subtype received
        actual: (u8, u8),
    },

    /// A request or fixed-size response did not match the command's layout.
    #[error("Invalid payload for {command:?}: {message}")]
    InvalidPayload {
        /// Command whose layout was violated
        command: MessageType,
        /// Expected versus actual size
        message: String,
    },

    /// The iceboot text exchange did not complete.
    #[error("Bootstrap exchange failed: {message}")]
    Bootstrap {
        /// Why the exchange stopped
        message: String,
    },
}

impl ProtocolError {
    /// Whether this is a command-status class failure.
    ///
    /// Both a non-success status byte and a facility/subtype mismatch count:
    /// the link itself worked, the instrument refused or misunderstood the
    /// command.
    pub fn is_command_status(&self) -> bool {
        matches!(
            self,
            Self::CommandStatus { .. } | Self::ResponseMismatch { .. }
        )
    }

    /// Status code carried by a [`ProtocolError::CommandStatus`].
    pub fn status_code(&self) -> Option<u8> {
        match self {
            Self::CommandStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptFrame {
            message: message.into(),
        }
    }
}

/// Error surfaced by a downstream [`DataProcessor`](crate::DataProcessor).
#[derive(Error, Debug)]
#[error("Data processor error: {message}")]
pub struct ProcessorError {
    /// Human-readable description.
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProcessorError {
    /// Create a processor error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processor error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Returned by [`Watchdog::sleep`](crate::Watchdog::sleep) when the watchdog
/// interrupted the sleeping acquisition thread.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Interrupted by watchdog")]
pub struct Interrupted;

/// Engine-level error. Signals the supervisor to reap the channel.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// A protocol exchange failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A downstream processor failed.
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// A link control operation (reset, softboot, open) failed.
    #[error("Link {operation} failed on channel {channel}: {source}")]
    Link {
        /// Failed operation
        operation: &'static str,
        /// Channel address
        channel: String,
        /// Driver error
        #[source]
        source: std::io::Error,
    },

    /// The calibration round trip failed.
    #[error("Calibration round trip failed on channel {channel}: {source}")]
    Calibration {
        /// Channel address
        channel: String,
        /// Driver error
        #[source]
        source: std::io::Error,
    },

    /// The watchdog interrupted a blocking operation.
    #[error("Operation interrupted by watchdog")]
    Interrupted,

    /// Every recovery attempt failed.
    #[error("Initialization of channel {channel} exhausted after {attempts} attempts: {last_error}")]
    InitializationExhausted {
        /// Channel address
        channel: String,
        /// Attempts made
        attempts: u32,
        /// Failure of the final attempt
        last_error: String,
    },

    /// The descriptor uses extended-mode features while extended mode is off.
    #[error("Extended mode is disabled but configuration requires: {violations:?}")]
    ExtendedModeViolation {
        /// Gated features the descriptor uses
        violations: Vec<ExtendedFeature>,
    },

    /// The operation is not valid in the current lifecycle state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time
        state: AcquisitionState,
    },

    /// An interval drain received a frame type it cannot demultiplex.
    #[error("Unexpected frame {facility}/{subtype} during interval drain")]
    UnexpectedFrame {
        /// Facility byte received
        facility: u8,
        /// Subtype byte received
        subtype: u8,
    },

    /// The interval batch is full.
    #[error("Interval batch overflow: capacity {capacity} exhausted")]
    BatchOverflow {
        /// Configured batch capacity
        capacity: usize,
    },
}

impl AcquisitionError {
    /// Whether the watchdog cut this operation short.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted => true,
            Self::Protocol(ProtocolError::Io(e)) => e.kind() == std::io::ErrorKind::Interrupted,
            Self::Link { source, .. } => source.kind() == std::io::ErrorKind::Interrupted,
            _ => false,
        }
    }

    /// Whether this error came from the downstream processor.
    pub fn is_processor_failure(&self) -> bool {
        matches!(self, Self::Processor(_))
    }
}

impl From<Interrupted> for AcquisitionError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

/// Errors loading or validating [`EngineSettings`](crate::EngineSettings).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings sources could not be read or deserialized.
    #[error("Settings error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value parsed but is not usable.
    #[error("Invalid setting '{field}': {message}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        message: String,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_status_classification() {
        let status = ProtocolError::CommandStatus {
            command: MessageType::SetHv,
            facility: 2,
            subtype: 14,
            status: 3,
        };
        let mismatch = ProtocolError::ResponseMismatch {
            command: MessageType::GetDomId,
            expected: (1, 10),
            actual: (3, 11),
        };
        let io = ProtocolError::Io(std::io::Error::other("gone"));

        assert!(status.is_command_status());
        assert!(mismatch.is_command_status());
        assert!(!io.is_command_status());
        assert_eq!(status.status_code(), Some(3));
        assert_eq!(mismatch.status_code(), None);
    }

    #[test]
    fn test_violation_message_lists_every_feature() {
        let err = AcquisitionError::ExtendedModeViolation {
            violations: vec![ExtendedFeature::DaqMode, ExtendedFeature::OnboardLed],
        };
        let msg = err.to_string();
        assert!(msg.contains("DaqMode"));
        assert!(msg.contains("OnboardLed"));
    }

    #[test]
    fn test_interrupt_classification() {
        let interrupted_io = AcquisitionError::Link {
            operation: "softboot",
            channel: "00A".into(),
            source: std::io::Error::from(std::io::ErrorKind::Interrupted),
        };
        let cal = AcquisitionError::Calibration {
            channel: "00A".into(),
            source: std::io::Error::other("tcal timeout"),
        };
        assert!(interrupted_io.is_interrupted());
        assert!(AcquisitionError::from(Interrupted).is_interrupted());
        assert!(!cal.is_interrupted());
        assert!(AcquisitionError::from(ProcessorError::new("sink closed")).is_processor_failure());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<ProtocolError>();
        assert_send_sync_static::<AcquisitionError>();
    }
}
