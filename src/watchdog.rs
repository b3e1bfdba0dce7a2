//! Heartbeat watchdog for one acquisition thread.
//!
//! A monitor thread waits for the deadline `last ping + threshold`. A thread
//! inside [`Watchdog::sleep`] counts as alive until its sleep ends, so the
//! deadline is measured from the later of the last ping and the sleep's end.
//! On expiry the monitor applies the current [`TimeoutAction`]:
//!
//! - `InterruptOnly` raises a pending interrupt, consumed by the acquisition
//!   thread's next [`Watchdog::sleep`], and re-arms the deadline.
//! - `Fatal` trips the watchdog, runs the supervisor callback once and stops
//!   monitoring. Every later sleep fails.
//!
//! Dropping the watchdog stops the monitor thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::collaborators::{TimeoutAction, Watchdog};
use crate::error::Interrupted;

/// Called with the channel name when a fatal timeout trips.
pub type FatalCallback = Box<dyn FnOnce(&str) + Send>;

struct MonitorState {
    last_ping: Instant,
    sleeping_until: Option<Instant>,
    threshold: Duration,
    action: TimeoutAction,
    interrupt_pending: bool,
    interrupts: u64,
    tripped: bool,
    shutdown: bool,
    on_fatal: Option<FatalCallback>,
}

struct Shared {
    name: String,
    state: Mutex<MonitorState>,
    wake: Condvar,
}

/// Watchdog backed by a dedicated monitor thread.
pub struct HeartbeatWatchdog {
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
}

impl HeartbeatWatchdog {
    /// Start monitoring with a fatal timeout action.
    pub fn start(
        name: impl Into<String>,
        threshold: Duration,
        on_fatal: Option<FatalCallback>,
    ) -> io::Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            state: Mutex::new(MonitorState {
                last_ping: Instant::now(),
                sleeping_until: None,
                threshold,
                action: TimeoutAction::Fatal,
                interrupt_pending: false,
                interrupts: 0,
                tripped: false,
                shutdown: false,
                on_fatal,
            }),
            wake: Condvar::new(),
        });

        let monitor_shared = Arc::clone(&shared);
        let monitor = thread::Builder::new()
            .name(format!("watchdog-{}", name))
            .spawn(move || monitor_loop(&monitor_shared))?;

        Ok(Self {
            shared,
            monitor: Some(monitor),
        })
    }

    /// Whether a fatal timeout has fired.
    pub fn is_tripped(&self) -> bool {
        self.shared.state.lock().tripped
    }

    /// Interrupts raised so far.
    pub fn interrupt_count(&self) -> u64 {
        self.shared.state.lock().interrupts
    }
}

fn monitor_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let alive_since = state
            .sleeping_until
            .map_or(state.last_ping, |until| until.max(state.last_ping));
        let deadline = alive_since + state.threshold;
        if Instant::now() < deadline {
            shared.wake.wait_until(&mut state, deadline);
            continue;
        }
        match state.action {
            TimeoutAction::InterruptOnly => {
                warn!(channel = %shared.name, threshold = ?state.threshold, "watchdog timeout, interrupting");
                state.interrupt_pending = true;
                state.interrupts += 1;
                state.last_ping = Instant::now();
                shared.wake.notify_all();
            }
            TimeoutAction::Fatal => {
                error!(channel = %shared.name, threshold = ?state.threshold, "watchdog timeout, aborting channel");
                state.tripped = true;
                let callback = state.on_fatal.take();
                shared.wake.notify_all();
                drop(state);
                if let Some(callback) = callback {
                    callback(&shared.name);
                }
                return;
            }
        }
    }
}

impl Watchdog for HeartbeatWatchdog {
    fn ping(&self) {
        self.shared.state.lock().last_ping = Instant::now();
        self.shared.wake.notify_all();
    }

    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let until = Instant::now() + duration;
        let mut state = self.shared.state.lock();
        state.last_ping = Instant::now();
        state.sleeping_until = Some(until);
        self.shared.wake.notify_all();
        let result = loop {
            if state.tripped {
                break Err(Interrupted);
            }
            if state.interrupt_pending {
                state.interrupt_pending = false;
                break Err(Interrupted);
            }
            if Instant::now() >= until {
                break Ok(());
            }
            self.shared.wake.wait_until(&mut state, until);
        };
        state.sleeping_until = None;
        state.last_ping = Instant::now();
        result
    }

    fn set_timeout_action(&self, action: TimeoutAction) -> TimeoutAction {
        let mut state = self.shared.state.lock();
        let prior = std::mem::replace(&mut state.action, action);
        self.shared.wake.notify_all();
        prior
    }

    fn set_timeout_threshold(&self, threshold: Duration) -> Duration {
        let mut state = self.shared.state.lock();
        let prior = std::mem::replace(&mut state.threshold, threshold);
        self.shared.wake.notify_all();
        prior
    }

    fn handle_interrupted(&self, context: &str) {
        let mut state = self.shared.state.lock();
        state.interrupt_pending = false;
        state.last_ping = Instant::now();
        debug!(channel = %self.shared.name, context, "interrupt handled");
    }
}

impl Drop for HeartbeatWatchdog {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_interrupt_only_breaks_next_sleep() {
        let watchdog = HeartbeatWatchdog::start("00A", Duration::from_millis(20), None).unwrap();
        watchdog.set_timeout_action(TimeoutAction::InterruptOnly);

        // stuck outside the watchdog, no pings
        thread::sleep(Duration::from_millis(100));

        assert_eq!(watchdog.sleep(Duration::from_secs(5)), Err(Interrupted));
        assert!(watchdog.interrupt_count() >= 1);
        assert!(!watchdog.is_tripped());
    }

    #[test]
    fn test_sleep_longer_than_threshold_counts_as_alive() {
        let watchdog = HeartbeatWatchdog::start("00A", Duration::from_millis(50), None).unwrap();

        assert_eq!(watchdog.sleep(Duration::from_millis(200)), Ok(()));
        assert!(!watchdog.is_tripped());

        watchdog.set_timeout_action(TimeoutAction::InterruptOnly);
        assert_eq!(watchdog.sleep(Duration::from_millis(200)), Ok(()));
        assert_eq!(watchdog.interrupt_count(), 0);
    }

    #[test]
    fn test_pings_keep_it_quiet() {
        let watchdog = HeartbeatWatchdog::start("00A", Duration::from_millis(200), None).unwrap();
        for _ in 0..5 {
            watchdog.ping();
            assert!(watchdog.sleep(Duration::from_millis(10)).is_ok());
        }
        assert_eq!(watchdog.interrupt_count(), 0);
        assert!(!watchdog.is_tripped());
    }

    #[test]
    fn test_fatal_runs_callback() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let watchdog = HeartbeatWatchdog::start(
            "12B",
            Duration::from_millis(10),
            Some(Box::new(move |name| {
                assert_eq!(name, "12B");
                flag.store(true, Ordering::SeqCst);
            })),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(watchdog.sleep(Duration::from_secs(5)), Err(Interrupted));
        assert!(watchdog.is_tripped());
        // callback runs after the monitor releases the lock
        for _ in 0..100 {
            if fired.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_setters_return_prior_values() {
        let watchdog = HeartbeatWatchdog::start("00A", Duration::from_secs(30), None).unwrap();
        assert_eq!(
            watchdog.set_timeout_action(TimeoutAction::InterruptOnly),
            TimeoutAction::Fatal
        );
        assert_eq!(
            watchdog.set_timeout_threshold(Duration::from_secs(60)),
            Duration::from_secs(30)
        );
    }
}
