//! Initialization and recovery.
//!
//! The cheap path reuses an instrument that is already running the
//! application. Anything else goes through a softboot: reset the link, boot
//! the instrument back into its loader, then reopen the port and start the
//! application. Both retry loops are bounded.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::guard::WatchdogPolicyGuard;
use super::{AcquisitionEngine, AcquisitionState};
use crate::collaborators::TimeoutAction;
use crate::error::{AcquisitionError, ProtocolError, Result};
use crate::link::{HardwareChannel, LinkDriver};
use crate::protocol::{MessageClient, MessageType};

impl<D: LinkDriver> AcquisitionEngine<D> {
    /// Bring the instrument into the acquisition application and return its
    /// hardware ID.
    ///
    /// With `force_softboot` the cheap path is skipped. The watchdog runs in
    /// interrupt-only mode for the duration; the prior policy is restored on
    /// every exit. On failure the channel stays `Initializing`.
    #[instrument(skip(self), fields(channel = %self.address))]
    pub fn initialize(&mut self, force_softboot: bool) -> Result<String> {
        match self.state {
            AcquisitionState::Uninitialized
            | AcquisitionState::Initializing
            | AcquisitionState::Initialized
            | AcquisitionState::Configured => {}
            _ => return Err(self.invalid_state("initialize")),
        }
        self.state = AcquisitionState::Initializing;

        let hardware_id = {
            let _policy = WatchdogPolicyGuard::install(
                &self.watchdog,
                TimeoutAction::InterruptOnly,
                self.settings.init_watchdog_threshold(),
            );
            self.recover(force_softboot)?
        };

        self.mainboard_id = u64::from_str_radix(&hardware_id, 16).unwrap_or(0);
        self.channel = Some(HardwareChannel::new(self.address, hardware_id.clone()));
        self.state = AcquisitionState::Initialized;
        info!(hardware_id = %hardware_id, "channel initialized");
        Ok(hardware_id)
    }

    fn recover(&mut self, force_softboot: bool) -> Result<String> {
        if !force_softboot {
            match self.try_running_application() {
                Ok(Some(hardware_id)) => {
                    debug!(hardware_id = %hardware_id, "application already running");
                    return Ok(hardware_id);
                }
                Ok(None) => info!("application not running, softbooting"),
                Err(e) => {
                    if e.is_interrupted() {
                        self.watchdog.handle_interrupted("probing running application");
                    }
                    warn!(error = %e, "probe failed, softbooting");
                }
            }
        }
        self.softboot_to_application()
    }

    /// Cheap path. `Ok(None)` means the application is not running or
    /// reported a null identity.
    fn try_running_application(&mut self) -> Result<Option<String>> {
        self.open_client()?;
        if !self.exchange(MessageClient::is_running_application)? {
            return Ok(None);
        }
        if let Err(e) = self.exchange(MessageClient::end_run) {
            debug!(error = %e, "no stale run to end");
        }
        self.exchange(MessageClient::get_dom_id)
    }

    fn softboot_to_application(&mut self) -> Result<String> {
        self.client = None;
        let address = self.address;
        self.watchdog.ping();
        self.driver
            .reset(&address)
            .map_err(|source| AcquisitionError::Link {
                operation: "reset",
                channel: address.to_string(),
                source,
            })?;

        self.with_retries(
            "softboot",
            self.settings.softboot_attempts,
            self.settings.softboot_backoff(),
            |engine| {
                engine.watchdog.ping();
                engine
                    .driver
                    .softboot(&address)
                    .map_err(|source| AcquisitionError::Link {
                        operation: "softboot",
                        channel: address.to_string(),
                        source,
                    })
            },
        )?;

        self.with_retries(
            "open",
            self.settings.open_attempts,
            self.settings.open_backoff(),
            |engine| {
                engine.open_client()?;
                engine.exchange(MessageClient::transition_to_application)?;
                engine
                    .exchange(MessageClient::get_dom_id)?
                    .ok_or_else(|| {
                        ProtocolError::InvalidPayload {
                            command: MessageType::GetDomId,
                            message: "instrument reported a null hardware ID".to_string(),
                        }
                        .into()
                    })
            },
        )
    }

    fn open_client(&mut self) -> Result<()> {
        self.client = None;
        let address = self.address;
        self.watchdog.ping();
        let port = self
            .driver
            .open(&address)
            .map_err(|source| AcquisitionError::Link {
                operation: "open",
                channel: address.to_string(),
                source,
            })?;
        let client = MessageClient::new(port, self.driver.is_blocking_mode())
            .with_poll_interval(self.settings.nonblocking_poll());
        self.client = Some(client);
        Ok(())
    }

    /// Run `op` up to `attempts` times with a watchdog sleep between
    /// attempts. An interrupted attempt or sleep counts as a soft retry.
    fn with_retries<T>(
        &mut self,
        operation: &'static str,
        attempts: u32,
        backoff: Duration,
        mut op: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if e.is_interrupted() {
                        self.watchdog.handle_interrupted(operation);
                    }
                    warn!(operation, attempt, attempts, error = %e, "attempt failed");
                    last_error = format!("{}: {}", operation, e);
                }
            }
            if attempt < attempts && self.watchdog.sleep(backoff).is_err() {
                self.watchdog.handle_interrupted(operation);
            }
        }
        Err(AcquisitionError::InitializationExhausted {
            channel: self.address.to_string(),
            attempts,
            last_error,
        })
    }
}
