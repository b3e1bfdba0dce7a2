//! Simulated instrument behind a mock link.
//!
//! [`MockLinkDriver`] emulates both personalities of an instrument:
//!
//! - **Bootloader**: binary frames are answered with a `"> "` prompt; the
//!   FPGA load line is answered with an echo and `">"`; the exec line with an
//!   echo and `"DOMAPP READY"`, after which the application is running.
//! - **Application**: each request frame is answered from a per-command
//!   script, falling back to an empty success frame (or the mainboard ID and
//!   release for identity queries).
//!
//! The driver is cheap to clone; every clone shares one [`MockState`], so a
//! test keeps a clone to script responses and inspect counters after moving
//! the original into an engine.
//!
//! # Example
//!
//! ```
//! use omdaq::link::mock::{MockLinkDriver, MockReply};
//! use omdaq::protocol::MessageType;
//!
//! let driver = MockLinkDriver::new();
//! driver.state().application_running = true;
//! driver.state().push_reply(MessageType::GetData, MockReply::ok(MessageType::GetData, &b"hit"[..]));
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use super::{ChannelAddress, LinkDriver, LinkPort};
use crate::calibration::CalibrationSample;
use crate::protocol::{FrameHeader, MessageFrame, MessageType, STATUS_SUCCESS};
use crate::testing::{Event, EventLog};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A response frame
    Frame {
        /// Facility byte
        facility: u8,
        /// Subtype byte
        subtype: u8,
        /// Status byte
        status: u8,
        /// Payload
        payload: Bytes,
    },
    /// Raw bytes delivered as-is
    Raw(Bytes),
}

impl MockReply {
    /// Success frame for `kind`.
    pub fn ok(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self::Frame {
            facility: kind.facility(),
            subtype: kind.subtype(),
            status: STATUS_SUCCESS,
            payload: payload.into(),
        }
    }

    /// Empty success frame for `kind`.
    pub fn empty(kind: MessageType) -> Self {
        Self::ok(kind, Bytes::new())
    }

    /// Failure frame for `kind` carrying `status`.
    pub fn status(kind: MessageType, status: u8) -> Self {
        Self::Frame {
            facility: kind.facility(),
            subtype: kind.subtype(),
            status,
            payload: Bytes::new(),
        }
    }

    /// Success frame with an arbitrary wire identity.
    pub fn wire(facility: u8, subtype: u8, payload: impl Into<Bytes>) -> Self {
        Self::Frame {
            facility,
            subtype,
            status: STATUS_SUCCESS,
            payload: payload.into(),
        }
    }
}

/// Shared state of the simulated instrument.
pub struct MockState {
    /// Whether the application (rather than the bootloader) is running
    pub application_running: bool,
    /// Mainboard ID reported by the identity query
    pub dom_id: u64,
    /// Release string reported by the release query
    pub release: String,
    /// Deliver responses in fragments of at most this many bytes
    pub fragment_size: Option<usize>,
    /// Whether the driver reports blocking reads
    pub blocking: bool,
    scripts: HashMap<(u8, u8), VecDeque<Vec<MockReply>>>,
    pending: VecDeque<(Option<(u8, u8)>, Bytes)>,
    open_failures: u32,
    softboot_failures: u32,
    transition_failures: u32,
    calibrations: VecDeque<io::Result<CalibrationSample>>,
    next_tick: u64,
    /// Port opens attempted
    pub opens: u32,
    /// Link resets
    pub resets: u32,
    /// Softboots attempted
    pub softboots: u32,
    /// Calibration round trips attempted
    pub calibration_reads: u32,
    /// Link releases
    pub releases: u32,
    /// Request frames received, in order
    pub requests: Vec<MessageType>,
    log: Option<EventLog>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            application_running: false,
            dom_id: 0x57bc_b2a3_c4f1,
            release: "domapp 443".to_string(),
            fragment_size: None,
            blocking: true,
            scripts: HashMap::new(),
            pending: VecDeque::new(),
            open_failures: 0,
            softboot_failures: 0,
            transition_failures: 0,
            calibrations: VecDeque::new(),
            next_tick: 1_000_000,
            opens: 0,
            resets: 0,
            softboots: 0,
            calibration_reads: 0,
            releases: 0,
            requests: Vec::new(),
            log: None,
        }
    }
}

impl MockState {
    /// Answer the next `kind` request with `reply`.
    pub fn push_reply(&mut self, kind: MessageType, reply: MockReply) {
        self.push_replies(kind, vec![reply]);
    }

    /// Answer the next `kind` request with several frames in order.
    pub fn push_replies(&mut self, kind: MessageType, replies: Vec<MockReply>) {
        self.scripts
            .entry(kind.wire_kind())
            .or_default()
            .push_back(replies);
    }

    /// Queue raw fragments for the next reads, ahead of any response.
    pub fn push_fragment(&mut self, fragment: impl Into<Bytes>) {
        self.pending.push_back((None, fragment.into()));
    }

    /// Fail the next `n` port opens.
    pub fn fail_opens(&mut self, n: u32) {
        self.open_failures = n;
    }

    /// Fail the next `n` softboots.
    pub fn fail_softboots(&mut self, n: u32) {
        self.softboot_failures = n;
    }

    /// Make the next `n` application launches hang without the ready banner.
    pub fn fail_transitions(&mut self, n: u32) {
        self.transition_failures = n;
    }

    /// Queue the result of a coming calibration round trip.
    pub fn push_calibration(&mut self, result: io::Result<CalibrationSample>) {
        self.calibrations.push_back(result);
    }

    /// Fail the next calibration round trip.
    pub fn fail_next_calibration(&mut self) {
        self.calibrations
            .push_back(Err(io::Error::new(io::ErrorKind::TimedOut, "tcal timeout")));
    }

    /// Whether every scripted reply and fragment has been consumed.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.scripts.values().all(VecDeque::is_empty)
    }

    fn record(&self, event: Event) {
        if let Some(log) = &self.log {
            log.push(event);
        }
    }

    fn enqueue(&mut self, label: Option<(u8, u8)>, bytes: Bytes) {
        match self.fragment_size {
            Some(size) if size > 0 && bytes.len() > size => {
                let mut rest = bytes;
                let mut first = true;
                while !rest.is_empty() {
                    let chunk = rest.split_to(size.min(rest.len()));
                    self.pending.push_back((if first { label } else { None }, chunk));
                    first = false;
                }
            }
            _ => self.pending.push_back((label, bytes)),
        }
    }

    fn handle_text(&mut self, bytes: &[u8]) {
        let line = String::from_utf8_lossy(bytes).trim_end().to_string();
        self.record(Event::SentText(line.clone()));
        if line.contains("exec") {
            if self.transition_failures > 0 {
                self.transition_failures -= 1;
                self.enqueue(None, Bytes::from(format!("{}\r\n", line)));
                return;
            }
            self.enqueue(None, Bytes::from(format!("{}\r\n", line)));
            self.enqueue(None, Bytes::from_static(b"DOMAPP READY\r\n"));
            self.application_running = true;
        } else if line.contains("fpga") {
            self.enqueue(None, Bytes::from(format!("{}\r\n", line)));
            self.enqueue(None, Bytes::from_static(b"> "));
        } else {
            self.enqueue(None, Bytes::from_static(b"> "));
        }
    }

    fn handle_frames(&mut self, mut bytes: &[u8]) {
        while let Some(header) = FrameHeader::parse(bytes) {
            let frame_len = crate::protocol::HEADER_LEN + header.data_len as usize;
            bytes = bytes.get(frame_len..).unwrap_or_default();
            self.record(Event::Sent {
                facility: header.facility,
                subtype: header.subtype,
            });
            let Some(kind) = MessageType::from_wire(header.facility, header.subtype) else {
                continue;
            };
            self.requests.push(kind);

            let replies = self
                .scripts
                .get_mut(&header.kind())
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| self.default_replies(kind));
            for reply in replies {
                match reply {
                    MockReply::Frame {
                        facility,
                        subtype,
                        status,
                        payload,
                    } => {
                        let frame =
                            MessageFrame::encode(facility, subtype, header.msg_id, status, &payload);
                        self.enqueue(Some((facility, subtype)), frame);
                    }
                    MockReply::Raw(raw) => self.enqueue(None, raw),
                }
            }
        }
    }

    fn default_replies(&self, kind: MessageType) -> Vec<MockReply> {
        match kind {
            MessageType::GetDomId => vec![MockReply::ok(kind, self.dom_id.to_be_bytes().to_vec())],
            MessageType::GetDomappRelease => {
                vec![MockReply::ok(kind, self.release.clone().into_bytes())]
            }
            MessageType::GetInterval => Vec::new(),
            _ => vec![MockReply::empty(kind)],
        }
    }

    fn next_calibration(&mut self) -> io::Result<CalibrationSample> {
        if let Some(result) = self.calibrations.pop_front() {
            return result;
        }
        let tick = self.next_tick;
        self.next_tick += 40_000;
        Ok(CalibrationSample::from_ticks(
            tick,
            tick + 80,
            tick * 2,
            tick * 2 + 20,
        ))
    }
}

/// Mock link driver; clones share state.
#[derive(Clone, Default)]
pub struct MockLinkDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockLinkDriver {
    /// Instrument sitting in its bootloader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instrument already running the application.
    pub fn running() -> Self {
        let driver = Self::new();
        driver.state().application_running = true;
        driver
    }

    /// Record link activity into `log`.
    pub fn with_event_log(self, log: EventLog) -> Self {
        self.state().log = Some(log);
        self
    }

    /// Lock the shared state.
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }
}

impl LinkDriver for MockLinkDriver {
    type Port = MockPort;

    fn open(&mut self, _channel: &ChannelAddress) -> io::Result<MockPort> {
        let mut state = self.state.lock();
        state.opens += 1;
        state.record(Event::Open);
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::NotFound, "mock device busy"));
        }
        state.pending.clear();
        Ok(MockPort {
            state: Arc::clone(&self.state),
        })
    }

    fn reset(&mut self, _channel: &ChannelAddress) -> io::Result<()> {
        let mut state = self.state.lock();
        state.resets += 1;
        state.record(Event::Reset);
        state.pending.clear();
        Ok(())
    }

    fn softboot(&mut self, _channel: &ChannelAddress) -> io::Result<()> {
        let mut state = self.state.lock();
        state.softboots += 1;
        state.record(Event::Softboot);
        if state.softboot_failures > 0 {
            state.softboot_failures -= 1;
            return Err(io::Error::other("mock softboot failed"));
        }
        state.application_running = false;
        state.pending.clear();
        Ok(())
    }

    fn is_blocking_mode(&self) -> bool {
        self.state.lock().blocking
    }

    fn read_calibration(&mut self, _channel: &ChannelAddress) -> io::Result<CalibrationSample> {
        let mut state = self.state.lock();
        state.calibration_reads += 1;
        state.record(Event::LinkCalibration);
        state.next_calibration()
    }

    fn release(&mut self, _channel: &ChannelAddress) {
        let mut state = self.state.lock();
        state.releases += 1;
        state.record(Event::Release);
    }
}

/// Port onto a [`MockLinkDriver`].
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl LinkPort for MockPort {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.application_running {
            state.handle_frames(bytes);
        } else {
            state.handle_text(bytes);
        }
        Ok(())
    }

    fn receive(&mut self) -> io::Result<Bytes> {
        let mut state = self.state.lock();
        match state.pending.pop_front() {
            Some((label, fragment)) => {
                if let Some((facility, subtype)) = label {
                    state.record(Event::Delivered { facility, subtype });
                }
                Ok(fragment)
            }
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "mock link has no pending data",
            )),
        }
    }
}
