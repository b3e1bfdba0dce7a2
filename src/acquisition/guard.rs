//! Scoped watchdog policy.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::collaborators::{TimeoutAction, Watchdog};

/// Installs a watchdog action and threshold for its lifetime and restores
/// the prior pair when dropped, whichever way the scope is left.
pub(crate) struct WatchdogPolicyGuard {
    watchdog: Arc<dyn Watchdog>,
    prior_action: TimeoutAction,
    prior_threshold: Duration,
}

impl WatchdogPolicyGuard {
    pub(crate) fn install(
        watchdog: &Arc<dyn Watchdog>,
        action: TimeoutAction,
        threshold: Duration,
    ) -> Self {
        let prior_action = watchdog.set_timeout_action(action);
        let prior_threshold = watchdog.set_timeout_threshold(threshold);
        debug!(?action, ?threshold, ?prior_action, ?prior_threshold, "watchdog policy installed");
        Self {
            watchdog: Arc::clone(watchdog),
            prior_action,
            prior_threshold,
        }
    }
}

impl Drop for WatchdogPolicyGuard {
    fn drop(&mut self) {
        self.watchdog.set_timeout_threshold(self.prior_threshold);
        self.watchdog.set_timeout_action(self.prior_action);
        self.watchdog.ping();
    }
}
