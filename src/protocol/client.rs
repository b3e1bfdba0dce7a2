//! Request/response client for one instrument.
//!
//! [`MessageClient`] owns the link port of a single channel. Every command is
//! one frame out and one frame back; the client checks the echoed
//! facility/subtype and the status byte and hands back the payload as a
//! [`Bytes`] view into its receive buffer.
//!
//! While the instrument sits in its bootloader it speaks a line-oriented text
//! protocol instead; [`MessageClient::bootstrap_exchange`] covers that.

use std::io;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::frame::{FrameAssembler, MessageFrame, MAX_PAYLOAD_LEN};
use super::message::{MessageType, PayloadLayout};
use crate::error::{ProtocolError, ProtocolResult};
use crate::link::LinkPort;

/// Upper bound on text accepted from the bootloader in one exchange.
const MAX_BOOTSTRAP_TEXT: usize = 64 * 1024;

/// Bootloader prompt.
pub const ICEBOOT_PROMPT: &str = ">";

/// Banner printed by the application once it is ready for frames.
pub const DOMAPP_READY: &str = "DOMAPP READY";

const LOAD_FPGA: &str = "s\" domapp.sbi.gz\" find if gunzip fpga endif";
const EXEC_DOMAPP: &str = "s\" domapp.gz\" find if gunzip exec endif";

/// Framed protocol client bound to one link port.
pub struct MessageClient<P: LinkPort> {
    port: P,
    assembler: FrameAssembler,
    next_msg_id: u8,
    blocking: bool,
    poll_interval: Duration,
}

impl<P: LinkPort> MessageClient<P> {
    /// Wrap an open port.
    ///
    /// `blocking` mirrors the driver's mode: in non-blocking mode an empty read
    /// is retried after the poll interval, in blocking mode it means the link
    /// closed.
    pub fn new(port: P, blocking: bool) -> Self {
        Self {
            port,
            assembler: FrameAssembler::new(),
            next_msg_id: 0,
            blocking,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Set the retry interval used for empty non-blocking reads.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Whether the underlying link blocks on reads.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Issue one command and return its response payload.
    pub fn command(&mut self, kind: MessageType, payload: &[u8]) -> ProtocolResult<Bytes> {
        self.send_request(kind, payload)?;
        let frame = self.receive_frame()?;
        Self::check_response(kind, &frame)?;
        Ok(frame.payload)
    }

    /// Send `depth` identical requests back to back, then drain exactly
    /// `depth` responses in send order.
    ///
    /// Empty payloads mean "no data" and are left out of the result.
    pub fn pipelined(&mut self, kind: MessageType, depth: usize) -> ProtocolResult<Vec<Bytes>> {
        for _ in 0..depth {
            self.send_request(kind, &[])?;
        }
        let mut payloads = Vec::with_capacity(depth);
        for _ in 0..depth {
            let frame = self.receive_frame()?;
            Self::check_response(kind, &frame)?;
            if !frame.payload.is_empty() {
                payloads.push(frame.payload);
            }
        }
        trace!(command = ?kind, depth, returned = payloads.len(), "pipelined read");
        Ok(payloads)
    }

    /// Validate and transmit one request frame. Returns the message ID used.
    pub fn send_request(&mut self, kind: MessageType, payload: &[u8]) -> ProtocolResult<u8> {
        let spec = kind.spec();
        if payload.len() > MAX_PAYLOAD_LEN || !spec.request.accepts(payload.len()) {
            return Err(ProtocolError::InvalidPayload {
                command: kind,
                message: format!(
                    "request of {} bytes does not fit layout {:?}",
                    payload.len(),
                    spec.request
                ),
            });
        }
        let msg_id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);

        let frame = MessageFrame::encode_request(kind.facility(), kind.subtype(), msg_id, payload);
        trace!(command = ?kind, msg_id, len = payload.len(), "send");
        self.port.send(&frame)?;
        Ok(msg_id)
    }

    /// Block until one complete frame has arrived and return it unchecked.
    ///
    /// Used directly by the interval drain, where several response types
    /// follow a single request.
    pub fn receive_frame(&mut self) -> ProtocolResult<MessageFrame> {
        loop {
            if let Some(frame) = self.assembler.next_frame()? {
                trace!(
                    facility = frame.header.facility,
                    subtype = frame.header.subtype,
                    len = frame.payload.len(),
                    "recv"
                );
                return Ok(frame);
            }
            let fragment = self.read_fragment()?;
            self.assembler.push(&fragment);
        }
    }

    fn read_fragment(&mut self) -> ProtocolResult<Bytes> {
        loop {
            let fragment = self.port.receive()?;
            if !fragment.is_empty() {
                return Ok(fragment);
            }
            if self.blocking {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "link closed").into());
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn check_response(kind: MessageType, frame: &MessageFrame) -> ProtocolResult<()> {
        let header = &frame.header;
        if header.kind() != kind.wire_kind() {
            return Err(ProtocolError::ResponseMismatch {
                command: kind,
                expected: kind.wire_kind(),
                actual: header.kind(),
            });
        }
        if !header.is_success() {
            return Err(ProtocolError::CommandStatus {
                command: kind,
                facility: header.facility,
                subtype: header.subtype,
                status: header.status,
            });
        }
        if let PayloadLayout::Fixed(len) = kind.spec().response {
            if frame.payload.len() != len {
                return Err(ProtocolError::InvalidPayload {
                    command: kind,
                    message: format!(
                        "expected {} response bytes, received {}",
                        len,
                        frame.payload.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Send one line to the bootloader and collect its output up to a
    /// fragment equal to `terminator`.
    ///
    /// Trailing whitespace and line terminators are ignored on both sides of
    /// the comparison. The returned text excludes the terminator fragment.
    pub fn bootstrap_exchange(&mut self, command: &str, terminator: &str) -> ProtocolResult<String> {
        self.assembler.clear();
        let line = format!("{}\r\n", command);
        debug!(command, terminator, "iceboot exchange");
        self.port.send(line.as_bytes())?;

        let terminator = terminator.trim_end();
        let mut collected = BytesMut::new();
        loop {
            let fragment = self.read_fragment()?;
            let text = String::from_utf8_lossy(&fragment);
            if text.trim_end() == terminator {
                return Ok(String::from_utf8_lossy(&collected).into_owned());
            }
            if collected.len() + fragment.len() > MAX_BOOTSTRAP_TEXT {
                return Err(ProtocolError::Bootstrap {
                    message: format!(
                        "no '{}' within {} bytes of output",
                        terminator, MAX_BOOTSTRAP_TEXT
                    ),
                });
            }
            collected.extend_from_slice(&fragment);
        }
    }

    /// Check whether the acquisition application is executing.
    ///
    /// Sends a release query. A well-formed success frame for that query means
    /// the application answered; bootloader text (an echo and a prompt) means
    /// it did not.
    pub fn is_running_application(&mut self) -> ProtocolResult<bool> {
        let kind = MessageType::GetDomappRelease;
        self.assembler.clear();
        self.send_request(kind, &[])?;

        let mut seen = BytesMut::new();
        loop {
            let fragment = self.read_fragment()?;
            seen.extend_from_slice(&fragment);
            self.assembler.push(&fragment);
            match self.assembler.next_frame() {
                Ok(Some(frame)) => {
                    return Ok(Self::check_response(kind, &frame).is_ok());
                }
                Ok(None) if !is_bootloader_text(&seen) && seen.len() <= MAX_BOOTSTRAP_TEXT => {
                    continue
                }
                Ok(None) | Err(ProtocolError::CorruptFrame { .. }) => {
                    debug!(bytes = seen.len(), "bootloader answered release query");
                    self.assembler.clear();
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive the bootloader into the acquisition application: load the FPGA
    /// image, then decompress and execute the application image.
    pub fn transition_to_application(&mut self) -> ProtocolResult<()> {
        self.bootstrap_exchange(LOAD_FPGA, ICEBOOT_PROMPT)?;
        let output = self.bootstrap_exchange(EXEC_DOMAPP, DOMAPP_READY)?;
        debug!(output = %output.trim(), "application started");
        self.assembler.clear();
        Ok(())
    }

    /// Give the port back, discarding buffered bytes.
    pub fn into_port(self) -> P {
        self.port
    }
}

fn is_bootloader_text(seen: &[u8]) -> bool {
    let trimmed = seen
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(&seen[..0], |end| &seen[..=end]);
    trimmed.ends_with(ICEBOOT_PROMPT.as_bytes()) && trimmed.iter().all(|b| b.is_ascii())
}
