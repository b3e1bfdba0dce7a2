//! Recording collaborators for tests and bench runs.
//!
//! [`RecordingProcessor`], [`RecordingClock`], [`ManualWatchdog`] and the mock
//! link driver can share one [`EventLog`], so a test can assert the relative
//! order of link activity, calibrations and downstream calls.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::calibration::ClockMeasurement;
use crate::collaborators::{
    ClockProcessor, DataCounters, DataProcessor, StreamCategory, TimeoutAction, UtcTime, Watchdog,
};
use crate::error::{Interrupted, ProcessorError};

/// One observable action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Request frame sent to the instrument
    Sent {
        /// Facility byte
        facility: u8,
        /// Subtype byte
        subtype: u8,
    },
    /// Text line sent to the bootloader
    SentText(String),
    /// First fragment of a response frame handed to the host
    Delivered {
        /// Facility byte
        facility: u8,
        /// Subtype byte
        subtype: u8,
    },
    /// Port opened
    Open,
    /// Link reset
    Reset,
    /// Softboot
    Softboot,
    /// Link calibration round trip
    LinkCalibration,
    /// Link released
    Release,
    /// Single buffer processed
    Process(StreamCategory),
    /// Batch processed, with its categories in order
    Batch(Vec<StreamCategory>),
    /// End of stream
    Eos(StreamCategory),
    /// UTC resolution request
    ResolveUtc(u64),
    /// Clock measurement forwarded
    Clock,
    /// Watchdog ping
    Ping,
    /// Watchdog sleep
    Sleep(Duration),
    /// Watchdog action change
    SetAction(TimeoutAction),
    /// Watchdog threshold change
    SetThreshold(Duration),
    /// Interruption acknowledged
    HandleInterrupted(String),
}

/// Shared, append-only event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    /// Copy of every event so far.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Events without watchdog pings.
    pub fn without_pings(&self) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| !matches!(e, Event::Ping))
            .cloned()
            .collect()
    }

    /// Index of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.lock().iter().position(pred)
    }

    /// Number of events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Forget everything logged so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[derive(Default)]
struct ProcessorState {
    entries: Vec<(StreamCategory, Bytes)>,
    batches: Vec<Vec<(StreamCategory, Bytes)>>,
    eos: Vec<StreamCategory>,
    fail_utc: bool,
    fail_categories: HashSet<StreamCategory>,
    fail_batches: bool,
}

/// Data processor that records everything it is given.
///
/// UTC resolution maps one instrument tick (25 ns) to 250 tenths of a
/// nanosecond.
pub struct RecordingProcessor {
    log: EventLog,
    counters: DataCounters,
    state: Mutex<ProcessorState>,
}

impl RecordingProcessor {
    /// Processor logging to `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            counters: DataCounters::new(),
            state: Mutex::new(ProcessorState::default()),
        }
    }

    /// Make UTC resolution fail.
    pub fn fail_utc(&self, fail: bool) {
        self.state.lock().fail_utc = fail;
    }

    /// Make single-buffer processing of a category fail.
    pub fn fail_category(&self, category: StreamCategory) {
        self.state.lock().fail_categories.insert(category);
    }

    /// Make batch processing fail.
    pub fn fail_batches(&self, fail: bool) {
        self.state.lock().fail_batches = fail;
    }

    /// Single buffers processed so far.
    pub fn entries(&self) -> Vec<(StreamCategory, Bytes)> {
        self.state.lock().entries.clone()
    }

    /// Payloads of one category processed singly.
    pub fn payloads(&self, category: StreamCategory) -> Vec<Bytes> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(c, _)| *c == category)
            .map(|(_, b)| b.clone())
            .collect()
    }

    /// Batches processed so far.
    pub fn batches(&self) -> Vec<Vec<(StreamCategory, Bytes)>> {
        self.state.lock().batches.clone()
    }

    /// End-of-stream signals so far.
    pub fn eos_signals(&self) -> Vec<StreamCategory> {
        self.state.lock().eos.clone()
    }
}

impl DataProcessor for RecordingProcessor {
    fn process(&self, category: StreamCategory, buffer: Bytes) -> Result<(), ProcessorError> {
        self.log.push(Event::Process(category));
        let mut state = self.state.lock();
        if state.fail_categories.contains(&category) {
            return Err(ProcessorError::new(format!("{} sink closed", category)));
        }
        state.entries.push((category, buffer));
        Ok(())
    }

    fn process_batch(&self, entries: &[(StreamCategory, Bytes)]) -> Result<(), ProcessorError> {
        self.log
            .push(Event::Batch(entries.iter().map(|(c, _)| *c).collect()));
        let mut state = self.state.lock();
        if state.fail_batches {
            return Err(ProcessorError::new("batch sink closed"));
        }
        state.batches.push(entries.to_vec());
        Ok(())
    }

    fn eos(&self, category: StreamCategory) -> Result<(), ProcessorError> {
        self.log.push(Event::Eos(category));
        self.state.lock().eos.push(category);
        Ok(())
    }

    fn resolve_utc_time(&self, device_tick: u64) -> Result<UtcTime, ProcessorError> {
        self.log.push(Event::ResolveUtc(device_tick));
        if self.state.lock().fail_utc {
            return Err(ProcessorError::new("no clock reference"));
        }
        Ok(UtcTime(device_tick * 250))
    }

    fn counters(&self) -> &DataCounters {
        &self.counters
    }
}

/// Clock processor that keeps every measurement.
pub struct RecordingClock {
    log: EventLog,
    measurements: Mutex<Vec<ClockMeasurement>>,
}

impl RecordingClock {
    /// Clock processor logging to `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            measurements: Mutex::new(Vec::new()),
        }
    }

    /// Measurements received so far.
    pub fn measurements(&self) -> Vec<ClockMeasurement> {
        self.measurements.lock().clone()
    }
}

impl ClockProcessor for RecordingClock {
    fn process(&self, measurement: ClockMeasurement) {
        self.log.push(Event::Clock);
        self.measurements.lock().push(measurement);
    }
}

struct ManualState {
    action: TimeoutAction,
    threshold: Duration,
    interrupts: VecDeque<bool>,
    pings: u64,
}

/// Watchdog driven entirely by the test.
///
/// Sleeps return immediately; [`ManualWatchdog::interrupt_sleeps`] scripts
/// which of the next sleeps report an interruption.
pub struct ManualWatchdog {
    log: EventLog,
    state: Mutex<ManualState>,
}

impl ManualWatchdog {
    /// Watchdog starting in fatal mode with a 30 s threshold.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            state: Mutex::new(ManualState {
                action: TimeoutAction::Fatal,
                threshold: Duration::from_secs(30),
                interrupts: VecDeque::new(),
                pings: 0,
            }),
        }
    }

    /// Script the outcome of upcoming sleeps (`true` interrupts).
    pub fn interrupt_sleeps(&self, pattern: &[bool]) {
        self.state.lock().interrupts.extend(pattern.iter().copied());
    }

    /// Current expiry action.
    pub fn action(&self) -> TimeoutAction {
        self.state.lock().action
    }

    /// Current threshold.
    pub fn threshold(&self) -> Duration {
        self.state.lock().threshold
    }

    /// Pings so far.
    pub fn pings(&self) -> u64 {
        self.state.lock().pings
    }
}

impl Watchdog for ManualWatchdog {
    fn ping(&self) {
        self.state.lock().pings += 1;
        self.log.push(Event::Ping);
    }

    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.log.push(Event::Sleep(duration));
        let interrupted = self.state.lock().interrupts.pop_front().unwrap_or(false);
        if interrupted {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    fn set_timeout_action(&self, action: TimeoutAction) -> TimeoutAction {
        self.log.push(Event::SetAction(action));
        std::mem::replace(&mut self.state.lock().action, action)
    }

    fn set_timeout_threshold(&self, threshold: Duration) -> Duration {
        self.log.push(Event::SetThreshold(threshold));
        std::mem::replace(&mut self.state.lock().threshold, threshold)
    }

    fn handle_interrupted(&self, context: &str) {
        self.log.push(Event::HandleInterrupted(context.to_string()));
    }
}
